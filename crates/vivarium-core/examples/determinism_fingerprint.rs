//! Deterministic replay fingerprint used for cross-host comparison.
//!
//! Runs a fixed world for a fixed number of cycles and prints an FNV
//! hash of the final save payload. Two builds that print different
//! fingerprints diverge somewhere in the simulation core.

use vivarium_core::{Engine, Inst};

const CYCLES: u32 = 10_000;

fn hash_bytes(hash: &mut u64, bytes: &[u8]) {
    for byte in bytes {
        *hash ^= u64::from(*byte);
        *hash = hash.wrapping_mul(0x1000_0000_01B3);
    }
}

fn fingerprint() -> String {
    let mut engine = Engine::with_seed(12, [0xDEAD, 0xBEEF, 0xF00D, 0xCAFE]);

    let genome = [
        Inst::Unit,
        Inst::Moda,
        Inst::Incn,
        Inst::Moda,
        Inst::Malf,
        Inst::Moda,
        Inst::Modb,
        Inst::Splt,
        Inst::Jmpb,
        Inst::Nop0,
        Inst::Nop1,
    ];
    for (offset, inst) in genome.iter().enumerate() {
        engine.set_inst(offset as u32, *inst);
    }
    engine.spawn(0, genome.len() as u32);

    for _ in 0..CYCLES {
        engine.step();
    }

    let mut hash = 0xcbf2_9ce4_8422_2325_u64;
    hash_bytes(&mut hash, &engine.serialize());
    hash_bytes(&mut hash, &engine.cycle().to_le_bytes());
    format!("{hash:016x}")
}

fn main() {
    println!("vivarium-fingerprint {}", fingerprint());
}
