//! Fuzz target: arbitrary genomes cycled under mutation must never
//! break the world's accounting.

#![no_main]

use libfuzzer_sys::fuzz_target;
use vivarium_core::{Engine, Inst};

fuzz_target!(|data: &[u8]| {
    if data.len() < 8 {
        return;
    }

    let seed = [
        u32::from_le_bytes([data[0], data[1], data[2], data[3]]) | 1,
        u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
        0x9E37_79B9,
        0x85EB_CA6B,
    ];
    let mut engine = Engine::with_seed(8, seed);

    let genome = &data[8..];
    let size = engine.memory().size();
    for (offset, byte) in genome.iter().take(size as usize).enumerate() {
        engine.set_inst(offset as u32, Inst::from_low_bits(*byte));
    }

    let organism = genome.len().clamp(1, 64) as u32;
    engine.spawn(0, organism);

    for _ in 0..256 {
        engine.step();
    }
    engine.validate();

    let bytes = engine.serialize();
    let restored = Engine::deserialize(&bytes);
    assert_eq!(restored.serialize(), bytes);
});
