//! Organism descriptors and the reaper queue.
//!
//! Live organisms sit in a circular queue ordered by age: the oldest at
//! `head` is next to die, the newest at `tail` ran most recently for the
//! first time. The queue doubles its backing array on demand; growth can
//! be anchored on a caller-chosen slot (the "queue lock") so that the
//! organism triggering the growth keeps its index across the move. All
//! identification is by `u32` slot index, never by reference, precisely
//! because the backing array relocates.

use rayon::prelude::*;

use crate::memory::WorldMemory;
use crate::snapshot::{put_u32, Reader, SnapshotError};

/// Sentinel slot index meaning "no organism". Both queue indices hold
/// this value exactly when the queue is empty.
pub const NO_PROCESS: u32 = u32::MAX;

/// Number of `u32` words in the serialized descriptor.
pub const PROC_WORDS: usize = 18;

/// One organism: a virtual CPU plus the memory blocks it owns.
///
/// `mb1` is the organism's own code region; `mb2` is the child block it
/// is growing or has just finished. A descriptor is free exactly when
/// `mb1s == 0`, and a free descriptor is all-zero. The field order is
/// the save-file word order and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Process {
    /// Own block address.
    pub mb1a: u32,
    /// Own block size; zero marks the descriptor free.
    pub mb1s: u32,
    /// Child block address.
    pub mb2a: u32,
    /// Child block size.
    pub mb2s: u32,
    /// Instruction pointer.
    pub ip: u32,
    /// Seeker pointer.
    pub sp: u32,
    /// General register.
    pub rax: u32,
    /// General register.
    pub rbx: u32,
    /// General register.
    pub rcx: u32,
    /// General register.
    pub rdx: u32,
    /// Eight-slot shifting stack; slot 0 is the top.
    pub stack: [u32; 8],
}

impl Process {
    /// Returns `true` when this descriptor holds no organism.
    #[must_use]
    pub const fn is_free(&self) -> bool {
        self.mb1s == 0
    }

    /// Returns the descriptor as the save-file word sequence.
    #[must_use]
    pub const fn as_words(&self) -> [u32; PROC_WORDS] {
        [
            self.mb1a,
            self.mb1s,
            self.mb2a,
            self.mb2s,
            self.ip,
            self.sp,
            self.rax,
            self.rbx,
            self.rcx,
            self.rdx,
            self.stack[0],
            self.stack[1],
            self.stack[2],
            self.stack[3],
            self.stack[4],
            self.stack[5],
            self.stack[6],
            self.stack[7],
        ]
    }

    const fn from_words(words: [u32; PROC_WORDS]) -> Self {
        Self {
            mb1a: words[0],
            mb1s: words[1],
            mb2a: words[2],
            mb2s: words[3],
            ip: words[4],
            sp: words[5],
            rax: words[6],
            rbx: words[7],
            rcx: words[8],
            rdx: words[9],
            stack: [
                words[10], words[11], words[12], words[13], words[14], words[15], words[16],
                words[17],
            ],
        }
    }
}

/// The process table and its circular reaper queue.
#[derive(Debug, Clone)]
pub struct ProcessTable {
    count: u32,
    head: u32,
    tail: u32,
    procs: Vec<Process>,
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable {
    /// Creates an empty table with room for one descriptor.
    #[must_use]
    pub fn new() -> Self {
        Self {
            count: 0,
            head: NO_PROCESS,
            tail: NO_PROCESS,
            procs: vec![Process::default()],
        }
    }

    /// Returns the number of live organisms.
    #[must_use]
    pub const fn count(&self) -> u32 {
        self.count
    }

    /// Returns the current backing-array capacity.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.procs.len() as u32
    }

    /// Returns the slot of the oldest organism, or [`NO_PROCESS`].
    #[must_use]
    pub const fn head(&self) -> u32 {
        self.head
    }

    /// Returns the slot of the newest organism, or [`NO_PROCESS`].
    #[must_use]
    pub const fn tail(&self) -> u32 {
        self.tail
    }

    /// Returns `true` when slot `pidx` holds no organism.
    ///
    /// # Panics
    ///
    /// Panics when `pidx` is outside the table.
    #[must_use]
    pub fn is_free(&self, pidx: u32) -> bool {
        let slot = &self.procs[self.index(pidx)];
        if slot.is_free() {
            debug_assert_eq!(*slot, Process::default(), "free slot {pidx} not zeroed");
            true
        } else {
            false
        }
    }

    /// Returns a copy of the descriptor in slot `pidx`, live or not.
    ///
    /// # Panics
    ///
    /// Panics when `pidx` is outside the table.
    #[must_use]
    pub fn get(&self, pidx: u32) -> Process {
        self.procs[self.index(pidx)]
    }

    pub(crate) fn slot(&self, pidx: u32) -> &Process {
        &self.procs[self.index(pidx)]
    }

    pub(crate) fn slot_mut(&mut self, pidx: u32) -> &mut Process {
        let index = self.index(pidx);
        &mut self.procs[index]
    }

    fn index(&self, pidx: u32) -> usize {
        assert!(
            pidx < self.capacity(),
            "process index {pidx} out of range for table of capacity {}",
            self.capacity()
        );
        pidx as usize
    }

    /// Creates an organism over an unallocated block. This is the host
    /// entry point for sowing a soup; organisms themselves reproduce
    /// through the allocation and split instructions.
    ///
    /// # Panics
    ///
    /// Panics when `size` is zero or `[address, address + size)` is not
    /// a fully in-range, fully unallocated block.
    pub fn spawn(&mut self, memory: &mut WorldMemory, address: u32, size: u32) {
        assert!(size > 0, "cannot spawn an empty organism");
        assert!(
            block_is_free_and_valid(memory, address, size),
            "spawn target [{address}, {address}+{size}) is not free soup"
        );
        self.create(memory, address, size, 0, true);
    }

    /// Births an organism over `[address, address + size)`. When
    /// `mark_allocated` is set the block's allocation flags are raised
    /// here; otherwise the block must already be allocated (the parent
    /// grew it cell by cell). `queue_lock` anchors any growth this birth
    /// triggers.
    pub(crate) fn create(
        &mut self,
        memory: &mut WorldMemory,
        address: u32,
        size: u32,
        queue_lock: u32,
        mark_allocated: bool,
    ) {
        assert!(memory.is_address_valid(address));
        assert!(memory.is_address_valid(address + size - 1));

        if mark_allocated {
            debug_assert!(block_is_free_and_valid(memory, address, size));
            for offset in 0..size {
                memory.set_allocated(address + offset);
            }
        }

        let pidx = self.acquire_slot(queue_lock);
        self.procs[pidx as usize] = Process {
            mb1a: address,
            mb1s: size,
            ip: address,
            sp: address,
            ..Process::default()
        };
    }

    /// Hands out the next free slot, growing the queue first if needed.
    fn acquire_slot(&mut self, queue_lock: u32) -> u32 {
        if self.count == self.capacity() {
            self.grow(queue_lock);
        }

        self.count += 1;

        if self.count == 1 {
            self.head = 0;
            self.tail = 0;
            0
        } else {
            self.tail = (self.tail + 1) % self.capacity();
            self.tail
        }
    }

    /// Doubles the backing array. The organism in slot `queue_lock`
    /// keeps its slot number: live descriptors are copied forward from
    /// the lock to the old tail, then backward from the lock to the old
    /// head, and the queue indices are rewritten to the destinations.
    fn grow(&mut self, queue_lock: u32) {
        assert_eq!(self.count, self.capacity(), "grow called on a non-full queue");
        assert!(queue_lock < self.capacity());

        let old_capacity = self.capacity();
        let new_capacity = old_capacity * 2;
        let mut next = vec![Process::default(); new_capacity as usize];

        let mut fwrd_idx = queue_lock;
        loop {
            let old_idx = fwrd_idx % old_capacity;
            next[fwrd_idx as usize] = self.procs[old_idx as usize];
            if old_idx == self.tail {
                self.tail = fwrd_idx;
                break;
            }
            fwrd_idx += 1;
        }

        if queue_lock != self.head {
            let mut back_idx = queue_lock.wrapping_sub(1) % new_capacity;
            loop {
                let old_idx = back_idx % old_capacity;
                next[back_idx as usize] = self.procs[old_idx as usize];
                if old_idx == self.head {
                    self.head = back_idx;
                    break;
                }
                back_idx = back_idx.wrapping_sub(1) % new_capacity;
            }
        }

        self.procs = next;
    }

    /// Kills the organism at the queue head: frees both owned blocks,
    /// zeroes the slot, and advances the queue.
    ///
    /// # Panics
    ///
    /// Panics when the queue is empty.
    pub fn reap(&mut self, memory: &mut WorldMemory) {
        assert!(self.count > 0, "reap on an empty queue");
        assert_ne!(self.head, NO_PROCESS);
        assert_ne!(self.tail, NO_PROCESS);
        assert!(!self.is_free(self.head));

        let victim = self.procs[self.head as usize];
        free_block(memory, victim.mb1a, victim.mb1s);
        if victim.mb2s != 0 {
            free_block(memory, victim.mb2a, victim.mb2s);
        }

        self.procs[self.head as usize] = Process::default();
        self.count -= 1;

        if self.head == self.tail {
            self.head = NO_PROCESS;
            self.tail = NO_PROCESS;
        } else {
            self.head = (self.head + 1) % self.capacity();
        }
    }

    /// Perturbs the organism in slot `pidx` with a random word: its
    /// `rax` rotates right by the word's low five bits. Descriptor-only;
    /// soup memory is never touched by mutation.
    ///
    /// # Panics
    ///
    /// Panics when `pidx` is outside the table or free.
    pub fn mutate(&mut self, pidx: u32, word: u32) {
        assert!(!self.is_free(pidx), "cannot mutate free slot {pidx}");
        let slot = self.slot_mut(pidx);
        slot.rax = slot.rax.rotate_right(word % 32);
    }

    /// Frees the child block of slot `pidx` and forgets it.
    pub(crate) fn free_child_block(&mut self, memory: &mut WorldMemory, pidx: u32) {
        let slot = self.slot(pidx);
        assert!(slot.mb2s != 0);
        let (address, size) = (slot.mb2a, slot.mb2s);
        free_block(memory, address, size);
        let slot = self.slot_mut(pidx);
        slot.mb2a = 0;
        slot.mb2s = 0;
    }

    /// Checks every structural invariant of the table against the soup:
    /// per-slot validity, the contiguous live arc between the queue
    /// indices, and the global allocation accounting. O(capacity +
    /// total owned cells); the per-slot pass fans out across threads.
    ///
    /// # Panics
    ///
    /// Panics on the first violated invariant.
    pub fn validate(&self, memory: &WorldMemory) {
        (0..self.capacity())
            .into_par_iter()
            .for_each(|pidx| self.validate_slot(memory, pidx));

        if self.count == 0 {
            assert_eq!(self.head, NO_PROCESS);
            assert_eq!(self.tail, NO_PROCESS);
        } else {
            assert!(!self.is_free(self.head));
            assert!(!self.is_free(self.tail));

            let mut live_in_arc = 0_u32;
            let mut pidx = self.head;
            loop {
                assert!(!self.is_free(pidx), "hole in reaper arc at slot {pidx}");
                live_in_arc += 1;
                if pidx == self.tail {
                    break;
                }
                pidx = (pidx + 1) % self.capacity();
            }
            assert_eq!(live_in_arc, self.count, "live slots outside the reaper arc");
        }

        let mut owned = 0_u32;
        for slot in &self.procs {
            if !slot.is_free() {
                owned += slot.mb1s;
                if slot.mb2s != 0 {
                    assert_ne!(slot.mb1a, slot.mb2a);
                    owned += slot.mb2s;
                }
            }
        }
        assert_eq!(
            owned,
            memory.allocated(),
            "owned block sizes disagree with the allocation counter"
        );
    }

    fn validate_slot(&self, memory: &WorldMemory, pidx: u32) {
        if self.is_free(pidx) {
            return;
        }

        let slot = self.slot(pidx);
        assert!(memory.is_address_valid(slot.ip));
        assert!(memory.is_address_valid(slot.sp));
        assert_block_allocated(memory, slot.mb1a, slot.mb1s);
        if slot.mb2s != 0 {
            assert_block_allocated(memory, slot.mb2a, slot.mb2s);
        }
    }

    pub(crate) fn save_into(&self, out: &mut Vec<u8>) {
        put_u32(out, 1);
        put_u32(out, self.count);
        put_u32(out, self.capacity());
        put_u32(out, self.head);
        put_u32(out, self.tail);
        for slot in &self.procs {
            for word in slot.as_words() {
                put_u32(out, word);
            }
        }
    }

    pub(crate) fn load_from(reader: &mut Reader<'_>) -> Result<Self, SnapshotError> {
        reader.expect_flag("process is_init")?;
        let count = reader.take_u32()?;
        let capacity = reader.take_u32()?;
        if capacity == 0 || count > capacity {
            return Err(SnapshotError::InvalidField {
                field: "process capacity",
                value: capacity,
            });
        }

        let head = reader.take_u32()?;
        let tail = reader.take_u32()?;
        let indices_ok = if count == 0 {
            head == NO_PROCESS && tail == NO_PROCESS
        } else {
            head < capacity && tail < capacity
        };
        if !indices_ok {
            return Err(SnapshotError::InvalidField {
                field: "process queue indices",
                value: head,
            });
        }

        let mut procs = Vec::with_capacity(capacity as usize);
        for _ in 0..capacity {
            let mut words = [0_u32; PROC_WORDS];
            for word in &mut words {
                *word = reader.take_u32()?;
            }
            procs.push(Process::from_words(words));
        }

        Ok(Self {
            count,
            head,
            tail,
            procs,
        })
    }
}

fn block_is_free_and_valid(memory: &WorldMemory, address: u32, size: u32) -> bool {
    (0..size).all(|offset| {
        let cell = address.wrapping_add(offset);
        memory.is_address_valid(cell) && !memory.is_allocated(cell)
    })
}

fn free_block(memory: &mut WorldMemory, address: u32, size: u32) {
    assert!(size > 0);
    assert!(memory.is_address_valid(address));
    assert!(memory.is_address_valid(address + size - 1));

    for offset in 0..size {
        let cell = address + offset;
        debug_assert!(memory.is_allocated(cell));
        memory.unset_allocated(cell);
    }
}

fn assert_block_allocated(memory: &WorldMemory, address: u32, size: u32) {
    for offset in 0..size {
        let cell = address.wrapping_add(offset);
        assert!(memory.is_address_valid(cell));
        assert!(memory.is_allocated(cell), "owned cell {cell} not allocated");
    }
}
