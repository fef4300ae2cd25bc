//! Core simulation engine for the Vivarium artificial-life virtual
//! machine.
//!
//! A Vivarium world is a flat, byte-addressed soup of five-bit
//! instructions in which self-replicating programs compete for memory.
//! Organisms run on a cooperative scheduler, one instruction per live
//! organism per cycle; a constant rain of cosmic-ray mutations and a
//! reaper queue culling the oldest organisms under memory pressure
//! supply the selection gradient. The whole world, generator state
//! included, saves to a flat binary payload and replays bit-for-bit.

/// Instruction set: opcodes, ordinals, and classification predicates.
pub mod instset;
pub use instset::{is_inst, Inst, INST_COUNT};

/// World memory: the soup, allocation flags, and opcode histogram.
pub mod memory;
pub use memory::{WorldMemory, ALLOCATED_FLAG, INSTRUCTION_MASK, MAX_ORDER};

/// The common channel connecting simulations through the host.
pub mod channel;
pub use channel::{CommonChannel, Receiver, Sender};

/// The evolver: xorshift generator, cosmic rays, process mutations.
pub mod evolver;
pub use evolver::Evolver;

/// Organism descriptors and the reaper queue.
pub mod process;
pub use process::{Process, ProcessTable, NO_PROCESS, PROC_WORDS};

/// The instruction interpreter and its fault taxonomy.
pub mod execute;
pub use execute::Fault;

/// Downsampled soup imaging for host front-ends.
pub mod render;
pub use render::{render_image, BLOCK_FLAG, IP_FLAG, MAX_CELL_SIZE};

mod snapshot;

/// The engine driver tying every subsystem together.
pub mod engine;
pub use engine::Engine;

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
#[cfg(test)]
use tempfile as _;
