//! The evolver: all randomness in the simulation flows from here.
//!
//! At the center sits a 128-bit xorshift generator. Its state is part of
//! the saved world, so a reloaded simulation replays bit-for-bit; the
//! only nondeterminism in the whole engine is the entropy used to seed a
//! fresh world. Each cycle the evolver fires one cosmic ray (a random
//! opcode at a random address, when the draw lands inside the soup) and
//! may perturb one live organism's registers.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::instset::{Inst, INST_COUNT};
use crate::memory::WorldMemory;
use crate::process::ProcessTable;
use crate::snapshot::{put_u32, Reader, SnapshotError};

/// Xorshift-128 generator plus mutation diagnostics.
#[derive(Debug, Clone)]
pub struct Evolver {
    last_changed_address: u32,
    last_changed_process: u32,
    state: [u32; 4],
}

impl Evolver {
    /// Creates an evolver seeded from operating-system entropy.
    #[must_use]
    pub fn from_entropy() -> Self {
        let mut rng = SmallRng::from_os_rng();
        loop {
            let seed = [rng.random(), rng.random(), rng.random(), rng.random()];
            if seed != [0; 4] {
                return Self::from_seed(seed);
            }
        }
    }

    /// Creates an evolver with an explicit state, for reproducible runs.
    ///
    /// # Panics
    ///
    /// Panics on the all-zero seed, which is a fixed point of xorshift.
    #[must_use]
    pub fn from_seed(seed: [u32; 4]) -> Self {
        assert!(seed != [0; 4], "xorshift seed must be nonzero");
        Self {
            last_changed_address: 0,
            last_changed_process: 0,
            state: seed,
        }
    }

    /// Returns the address hit by the most recent cosmic ray.
    #[must_use]
    pub const fn last_changed_address(&self) -> u32 {
        self.last_changed_address
    }

    /// Returns the slot of the most recently perturbed organism.
    #[must_use]
    pub const fn last_changed_process(&self) -> u32 {
        self.last_changed_process
    }

    /// Returns one 32-bit word of generator state.
    ///
    /// # Panics
    ///
    /// Panics when `index >= 4`.
    #[must_use]
    pub const fn state_word(&self, index: usize) -> u32 {
        self.state[index]
    }

    /// Advances the generator one step.
    fn next_raw(&mut self) -> u32 {
        let mut t = self.state[3];
        t ^= t << 11;
        t ^= t >> 8;
        self.state[3] = self.state[2];
        self.state[2] = self.state[1];
        self.state[1] = self.state[0];
        let s0 = self.state[0];
        t ^= s0;
        t ^= s0 >> 19;
        self.state[0] = t;
        t
    }

    /// Writes a random opcode into `address` and records the hit.
    fn randomize_at(&mut self, memory: &mut WorldMemory, address: u32) {
        debug_assert!(memory.is_address_valid(address));
        let inst = Inst::from_low_bits((self.next_raw() % INST_COUNT as u32) as u8);
        self.last_changed_address = address;
        memory.set_inst(address, inst);
    }

    /// Runs one evolver cycle. Draw order is fixed: the ray address
    /// first, the process selector second, then the conditional opcode
    /// and mutation draws. Replay depends on this order.
    ///
    /// The process selector divides by the live count, so the chance of
    /// any organism being perturbed scales with how crowded the soup is.
    pub(crate) fn step(&mut self, memory: &mut WorldMemory, procs: &mut ProcessTable) {
        let address = self.next_raw();
        let pidx = self.next_raw() / procs.count().max(1);

        if memory.is_address_valid(address) {
            self.randomize_at(memory, address);
        }

        if pidx < procs.capacity() && !procs.is_free(pidx) {
            let word = self.next_raw();
            procs.mutate(pidx, word);
            self.last_changed_process = pidx;
        }
    }

    pub(crate) fn save_into(&self, out: &mut Vec<u8>) {
        put_u32(out, 1);
        put_u32(out, self.last_changed_address);
        put_u32(out, self.last_changed_process);
        for word in self.state {
            put_u32(out, word);
        }
    }

    pub(crate) fn load_from(reader: &mut Reader<'_>) -> Result<Self, SnapshotError> {
        reader.expect_flag("evolver is_init")?;
        let last_changed_address = reader.take_u32()?;
        let last_changed_process = reader.take_u32()?;
        let mut state = [0_u32; 4];
        for word in &mut state {
            *word = reader.take_u32()?;
        }
        if state == [0; 4] {
            return Err(SnapshotError::InvalidField {
                field: "evolver state",
                value: 0,
            });
        }

        Ok(Self {
            last_changed_address,
            last_changed_process,
            state,
        })
    }
}
