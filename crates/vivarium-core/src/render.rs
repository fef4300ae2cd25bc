//! One-dimensional soup imaging for host front-ends.
//!
//! Hosts draw the soup as a strip of pixels, each covering a run of
//! consecutive cells. Iterating large soups from a scripting host is
//! far too slow, so the downsampling happens here, fanned out across
//! threads. Rendering is a pure read of memory and process state.

use rayon::prelude::*;

use crate::memory::{WorldMemory, ALLOCATED_FLAG};
use crate::process::ProcessTable;

/// Output bit marking a pixel whose group holds a block start
/// (`mb1a` or `mb2a`) of some live organism.
pub const BLOCK_FLAG: u8 = 0x40;

/// Output bit marking a pixel whose group holds a live instruction
/// pointer.
pub const IP_FLAG: u8 = 0x80;

/// Largest supported cells-per-pixel factor.
pub const MAX_CELL_SIZE: u32 = 0x10000;

/// Renders a strip of `buffer.len()` pixels starting at `origin`, each
/// covering `cell_size` cells. A pixel's low five bits hold the integer
/// mean of the covered opcodes, bit `0x20` reports any allocated cell in
/// the group, and the top two bits are the overlay flags above. Cells
/// past the end of the soup contribute nothing to the mean but keep
/// their place in the divisor.
///
/// # Panics
///
/// Panics when `origin` is outside the soup, `cell_size` is zero or
/// above [`MAX_CELL_SIZE`], or `buffer` is empty.
pub fn render_image(
    memory: &WorldMemory,
    procs: &ProcessTable,
    origin: u32,
    cell_size: u32,
    buffer: &mut [u8],
) {
    assert!(memory.is_address_valid(origin), "render origin out of range");
    assert!(cell_size > 0, "render cell size must be nonzero");
    assert!(cell_size <= MAX_CELL_SIZE, "render cell size too large");
    assert!(!buffer.is_empty(), "render buffer is empty");

    let size = u64::from(memory.size());
    buffer.par_iter_mut().enumerate().for_each(|(pixel, out)| {
        let base = u64::from(origin) + pixel as u64 * u64::from(cell_size);
        let mut inst_sum = 0_u32;
        let mut alloc_flag = 0_u8;

        for offset in 0..u64::from(cell_size) {
            let address = base + offset;
            if address >= size {
                continue;
            }
            let address = address as u32;
            inst_sum += memory.inst_at(address) as u32;
            if memory.is_allocated(address) {
                alloc_flag = ALLOCATED_FLAG;
            }
        }

        *out = (inst_sum / cell_size) as u8 | alloc_flag;
    });

    // Overlay pass: mark block starts and instruction pointers of every
    // live organism that falls inside the rendered window.
    let max_pos = u64::from(origin) + u64::from(cell_size) * buffer.len() as u64;
    for pidx in 0..procs.capacity() {
        if procs.is_free(pidx) {
            continue;
        }
        let proc = procs.get(pidx);
        apply_flag(origin, max_pos, cell_size, proc.ip, IP_FLAG, buffer);
        apply_flag(origin, max_pos, cell_size, proc.mb1a, BLOCK_FLAG, buffer);
        if proc.mb2s != 0 {
            apply_flag(origin, max_pos, cell_size, proc.mb2a, BLOCK_FLAG, buffer);
        }
    }
}

fn apply_flag(
    origin: u32,
    max_pos: u64,
    cell_size: u32,
    address: u32,
    flag: u8,
    buffer: &mut [u8],
) {
    if address >= origin && u64::from(address) < max_pos {
        let pixel = (address - origin) / cell_size;
        buffer[pixel as usize] |= flag;
    }
}
