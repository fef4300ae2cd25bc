//! World memory: the flat instruction soup and its bookkeeping.
//!
//! Each cell is one octet. The low five bits hold the opcode and bit
//! `0x20` holds the allocation flag; the two top bits are reserved for
//! render overlays and never appear in soup cells. The soup maintains
//! two derived quantities on every write: the per-opcode histogram and
//! the count of allocated cells. Keeping them incremental is what makes
//! per-cycle memory pressure checks and host-side statistics O(1).

use crate::instset::{Inst, INST_COUNT};
use crate::snapshot::{put_u32, Reader, SnapshotError};

/// Cell bit holding the allocation flag.
pub const ALLOCATED_FLAG: u8 = 0x20;

/// Cell bits holding the opcode.
pub const INSTRUCTION_MASK: u8 = 0x1f;

/// Largest supported memory order (`size == 1 << order`).
pub const MAX_ORDER: u32 = 31;

/// The world soup and its incremental counters.
#[derive(Debug, Clone)]
pub struct WorldMemory {
    order: u32,
    size: u32,
    allocated: u32,
    capacity: u32,
    inst_counter: [u32; INST_COUNT],
    cells: Box<[u8]>,
}

impl WorldMemory {
    /// Creates a zeroed soup of `1 << order` cells. A zeroed cell is an
    /// unallocated `NOP0`, so the histogram starts with every cell
    /// counted under ordinal zero.
    ///
    /// # Panics
    ///
    /// Panics when `order > MAX_ORDER`.
    #[must_use]
    pub fn new(order: u32) -> Self {
        assert!(order <= MAX_ORDER, "memory order {order} out of range");
        let size = 1_u32 << order;
        let mut inst_counter = [0_u32; INST_COUNT];
        inst_counter[Inst::Nop0.index()] = size;

        Self {
            order,
            size,
            allocated: 0,
            capacity: size / 2,
            inst_counter,
            cells: vec![0; size as usize].into_boxed_slice(),
        }
    }

    /// Returns the memory order.
    #[must_use]
    pub const fn order(&self) -> u32 {
        self.order
    }

    /// Returns the soup size in cells.
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.size
    }

    /// Returns the number of cells with the allocation flag set.
    #[must_use]
    pub const fn allocated(&self) -> u32 {
        self.allocated
    }

    /// Returns the reaper threshold (half the soup size).
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Returns how many cells currently hold `inst`.
    #[must_use]
    pub const fn inst_count(&self, inst: Inst) -> u32 {
        self.inst_counter[inst.index()]
    }

    /// Returns `true` once more than half the soup is allocated. The
    /// reaper culls from the queue head until this clears.
    #[must_use]
    pub const fn is_over_capacity(&self) -> bool {
        self.allocated > self.capacity
    }

    /// Returns `true` when `address` names a cell.
    #[must_use]
    pub const fn is_address_valid(&self, address: u32) -> bool {
        address < self.size
    }

    /// Returns `true` when the cell at `address` is allocated.
    ///
    /// # Panics
    ///
    /// Panics on an out-of-range address.
    #[must_use]
    pub fn is_allocated(&self, address: u32) -> bool {
        self.cells[self.index(address)] & ALLOCATED_FLAG != 0
    }

    /// Sets the allocation flag at `address`. Idempotent.
    ///
    /// # Panics
    ///
    /// Panics on an out-of-range address.
    pub fn set_allocated(&mut self, address: u32) {
        let index = self.index(address);
        if self.cells[index] & ALLOCATED_FLAG == 0 {
            self.cells[index] |= ALLOCATED_FLAG;
            self.allocated += 1;
        }
    }

    /// Clears the allocation flag at `address`. Idempotent.
    ///
    /// # Panics
    ///
    /// Panics on an out-of-range address.
    pub fn unset_allocated(&mut self, address: u32) {
        let index = self.index(address);
        if self.cells[index] & ALLOCATED_FLAG != 0 {
            self.cells[index] &= !ALLOCATED_FLAG;
            self.allocated -= 1;
        }
    }

    /// Returns the opcode at `address`.
    ///
    /// # Panics
    ///
    /// Panics on an out-of-range address.
    #[must_use]
    pub fn inst_at(&self, address: u32) -> Inst {
        Inst::from_low_bits(self.cells[self.index(address)])
    }

    /// Writes `inst` into `address`, keeping the histogram exact:
    /// the old opcode's counter drops and the new one rises in the same
    /// call. The allocation flag is untouched.
    ///
    /// # Panics
    ///
    /// Panics on an out-of-range address.
    pub fn set_inst(&mut self, address: u32, inst: Inst) {
        let index = self.index(address);
        let old = Inst::from_low_bits(self.cells[index]);
        self.inst_counter[old.index()] -= 1;
        self.cells[index] = (self.cells[index] & !INSTRUCTION_MASK) | inst as u8;
        self.inst_counter[inst.index()] += 1;
    }

    /// Returns the raw cell at `address`, opcode and flag together.
    ///
    /// # Panics
    ///
    /// Panics on an out-of-range address.
    #[must_use]
    pub fn byte_at(&self, address: u32) -> u8 {
        self.cells[self.index(address)]
    }

    fn index(&self, address: u32) -> usize {
        assert!(
            self.is_address_valid(address),
            "address {address} out of range for soup of size {}",
            self.size
        );
        address as usize
    }

    /// Recounts every derived quantity from the raw cells and asserts
    /// the incremental counters match. O(size); called per cycle only in
    /// debug builds.
    ///
    /// # Panics
    ///
    /// Panics when any counter disagrees with the cells.
    pub fn validate(&self) {
        assert!(self.capacity <= self.size / 2);

        let mut histogram = [0_u32; INST_COUNT];
        let mut allocated = 0_u32;
        for cell in &self.cells {
            histogram[(cell & INSTRUCTION_MASK) as usize] += 1;
            if cell & ALLOCATED_FLAG != 0 {
                allocated += 1;
            }
        }

        assert_eq!(histogram, self.inst_counter, "opcode histogram drifted");
        assert_eq!(allocated, self.allocated, "allocation counter drifted");
        assert_eq!(
            self.inst_counter.iter().sum::<u32>(),
            self.size,
            "histogram does not cover the soup"
        );
    }

    pub(crate) fn save_into(&self, out: &mut Vec<u8>) {
        put_u32(out, 1);
        put_u32(out, self.order);
        put_u32(out, self.size);
        put_u32(out, self.allocated);
        put_u32(out, self.capacity);
        for count in self.inst_counter {
            put_u32(out, count);
        }
        out.extend_from_slice(&self.cells);
    }

    pub(crate) fn load_from(reader: &mut Reader<'_>) -> Result<Self, SnapshotError> {
        reader.expect_flag("memory is_init")?;
        let order = reader.take_u32()?;
        if order > MAX_ORDER {
            return Err(SnapshotError::InvalidField {
                field: "memory order",
                value: order,
            });
        }

        let size = reader.take_u32()?;
        if size != 1_u32 << order {
            return Err(SnapshotError::InvalidField {
                field: "memory size",
                value: size,
            });
        }

        let allocated = reader.take_u32()?;
        if allocated > size {
            return Err(SnapshotError::InvalidField {
                field: "memory allocated",
                value: allocated,
            });
        }

        let capacity = reader.take_u32()?;
        if capacity != size / 2 {
            return Err(SnapshotError::InvalidField {
                field: "memory capacity",
                value: capacity,
            });
        }

        let mut inst_counter = [0_u32; INST_COUNT];
        for count in &mut inst_counter {
            *count = reader.take_u32()?;
        }

        let cells = reader.take_bytes(size as usize)?.to_vec().into_boxed_slice();

        Ok(Self {
            order,
            size,
            allocated,
            capacity,
            inst_counter,
            cells,
        })
    }
}
