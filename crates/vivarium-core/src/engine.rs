//! The engine driver: owns every subsystem and advances the world.
//!
//! One engine value is one simulation. Creating it initializes memory,
//! evolver, and processes in that order; dropping it releases
//! everything. A single `step` call runs the full per-cycle sequence:
//! counters, debug validation, the evolver's mutations, then one
//! instruction for every live organism followed by reaper culling.
//! Between two `step` calls the host may read any state freely.

use std::fs;
use std::path::Path;

use crate::channel::{CommonChannel, Receiver, Sender};
use crate::evolver::Evolver;
use crate::execute;
use crate::instset::Inst;
use crate::memory::WorldMemory;
use crate::process::ProcessTable;
use crate::render;
use crate::snapshot::{put_u32, Reader, SnapshotError};

/// A complete simulation: soup, organisms, randomness, and counters.
#[derive(Debug)]
pub struct Engine {
    cycle: u32,
    epoch: u32,
    memory: WorldMemory,
    evolver: Evolver,
    procs: ProcessTable,
    channel: CommonChannel,
}

impl Engine {
    /// Creates a fresh simulation with a soup of `1 << order` cells and
    /// an entropy-seeded evolver.
    ///
    /// # Panics
    ///
    /// Panics when `order` exceeds [`crate::memory::MAX_ORDER`].
    #[must_use]
    pub fn new(order: u32) -> Self {
        Self::with_evolver(order, Evolver::from_entropy())
    }

    /// Creates a fresh simulation with an explicit evolver seed, for
    /// reproducible runs.
    ///
    /// # Panics
    ///
    /// Panics when `order` exceeds [`crate::memory::MAX_ORDER`] or the
    /// seed is all zero.
    #[must_use]
    pub fn with_seed(order: u32, seed: [u32; 4]) -> Self {
        Self::with_evolver(order, Evolver::from_seed(seed))
    }

    fn with_evolver(order: u32, evolver: Evolver) -> Self {
        Self {
            cycle: 0,
            epoch: 0,
            memory: WorldMemory::new(order),
            evolver,
            procs: ProcessTable::new(),
            channel: CommonChannel::new(),
        }
    }

    /// Advances the simulation one cycle.
    pub fn step(&mut self) {
        self.cycle = self.cycle.wrapping_add(1);
        if self.cycle == 0 {
            self.epoch = self.epoch.wrapping_add(1);
        }

        #[cfg(debug_assertions)]
        self.validate();

        self.evolver.step(&mut self.memory, &mut self.procs);
        execute::cycle_all(&mut self.memory, &mut self.procs, &mut self.channel);
    }

    /// Returns the cycle counter.
    #[must_use]
    pub const fn cycle(&self) -> u32 {
        self.cycle
    }

    /// Returns the epoch counter. The pair (epoch, cycle) is a 64-bit
    /// age: the epoch rises each time the cycle counter wraps.
    #[must_use]
    pub const fn epoch(&self) -> u32 {
        self.epoch
    }

    /// Returns the world memory.
    #[must_use]
    pub const fn memory(&self) -> &WorldMemory {
        &self.memory
    }

    /// Returns the process table.
    #[must_use]
    pub const fn procs(&self) -> &ProcessTable {
        &self.procs
    }

    /// Returns the evolver.
    #[must_use]
    pub const fn evolver(&self) -> &Evolver {
        &self.evolver
    }

    /// Writes an opcode into the soup. Hosts use this to compile
    /// genomes into a fresh world before sowing organisms over them.
    ///
    /// # Panics
    ///
    /// Panics on an out-of-range address.
    pub fn set_inst(&mut self, address: u32, inst: Inst) {
        self.memory.set_inst(address, inst);
    }

    /// Creates an organism over a free block of soup.
    ///
    /// # Panics
    ///
    /// Panics when the block is not fully in range and unallocated, or
    /// `size` is zero.
    pub fn spawn(&mut self, address: u32, size: u32) {
        self.procs.spawn(&mut self.memory, address, size);
    }

    /// Kills the oldest organism.
    ///
    /// # Panics
    ///
    /// Panics when no organism is alive.
    pub fn reap(&mut self) {
        self.procs.reap(&mut self.memory);
    }

    /// Attaches the `SEND` sink.
    pub fn set_sender(&mut self, sender: Box<dyn Sender>) {
        self.channel.set_sender(sender);
    }

    /// Attaches the `RECV` source.
    pub fn set_receiver(&mut self, receiver: Box<dyn Receiver>) {
        self.channel.set_receiver(receiver);
    }

    /// Detaches the `SEND` sink.
    pub fn clear_sender(&mut self) {
        self.channel.clear_sender();
    }

    /// Detaches the `RECV` source.
    pub fn clear_receiver(&mut self) {
        self.channel.clear_receiver();
    }

    /// Renders a downsampled strip of the soup into `buffer`.
    ///
    /// # Panics
    ///
    /// Panics on an invalid origin, cell size, or empty buffer.
    pub fn render(&self, origin: u32, cell_size: u32, buffer: &mut [u8]) {
        render::render_image(&self.memory, &self.procs, origin, cell_size, buffer);
    }

    /// Checks every cross-subsystem invariant. Runs before each cycle
    /// in debug builds; always available to hosts and tests.
    ///
    /// # Panics
    ///
    /// Panics on the first violated invariant.
    pub fn validate(&self) {
        self.memory.validate();
        self.procs.validate(&self.memory);
    }

    /// Encodes the complete simulation state as the flat little-endian
    /// save payload. Channel attachments are host wiring and are not
    /// part of the state.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        put_u32(&mut out, 1);
        put_u32(&mut out, self.cycle);
        put_u32(&mut out, self.epoch);
        self.memory.save_into(&mut out);
        self.evolver.save_into(&mut out);
        self.procs.save_into(&mut out);
        out
    }

    /// Decodes a simulation from a save payload.
    ///
    /// # Panics
    ///
    /// Panics when the payload is truncated, has trailing bytes, or
    /// holds an inconsistent field.
    #[must_use]
    pub fn deserialize(bytes: &[u8]) -> Self {
        match Self::try_deserialize(bytes) {
            Ok(engine) => engine,
            Err(err) => panic!("cannot restore simulation: {err}"),
        }
    }

    fn try_deserialize(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let mut reader = Reader::new(bytes);
        reader.expect_flag("engine is_init")?;
        let cycle = reader.take_u32()?;
        let epoch = reader.take_u32()?;
        let memory = WorldMemory::load_from(&mut reader)?;
        let evolver = Evolver::load_from(&mut reader)?;
        let procs = ProcessTable::load_from(&mut reader)?;
        reader.finish()?;

        Ok(Self {
            cycle,
            epoch,
            memory,
            evolver,
            procs,
            channel: CommonChannel::new(),
        })
    }

    /// Writes the save payload to `path`.
    ///
    /// # Panics
    ///
    /// Panics when the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        if let Err(err) = fs::write(path, self.serialize()) {
            panic!("cannot save simulation to {}: {err}", path.display());
        }
    }

    /// Reads a simulation back from a save file.
    ///
    /// # Panics
    ///
    /// Panics when the file cannot be read or does not hold a valid
    /// save payload.
    #[must_use]
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match fs::read(path) {
            Ok(bytes) => Self::deserialize(&bytes),
            Err(err) => panic!("cannot load simulation from {}: {err}", path.display()),
        }
    }
}
