//! The interpreter: one instruction per live organism per cycle.
//!
//! Execution is cooperative and bounded: nothing an organism does can
//! take more than constant work in a single cycle. Operations that act
//! at a distance (jumps, searches, allocation, loads, stores) move the
//! seeker pointer a single cell per cycle instead of completing at
//! once, so reaching an address costs time proportional to the
//! distance. The instruction pointer holds still while the seeker
//! travels and advances only when the operation commits or faults.
//!
//! Faults are not errors. Any malformed operation, from a missing
//! register modifier to a division by zero, consumes the cycle and
//! advances `ip` past the offending opcode; the organism keeps running.
//! The soup must stay executable under every possible byte pattern,
//! mutations included.

use thiserror::Error;

use crate::channel::CommonChannel;
use crate::instset::Inst;
use crate::memory::WorldMemory;
use crate::process::{Process, ProcessTable};

/// Ways an instruction can go wrong. Faults are consumed inside the
/// cycle that raised them and never escape the interpreter; the
/// taxonomy exists for dispatch and for tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Fault {
    /// A register modifier was missing, out of range, or not a modifier.
    #[error("register modifier missing after instruction")]
    MissingModifier,
    /// No template follows a jump or search instruction.
    #[error("no template follows the instruction")]
    MissingTemplate,
    /// An operand named an address outside the soup.
    #[error("operand address out of range")]
    InvalidAddress,
    /// An operand value is not a valid opcode.
    #[error("operand is not an instruction")]
    InvalidInstruction,
    /// A child block of size zero was requested.
    #[error("zero-size allocation request")]
    EmptyAllocation,
    /// The seeker is not adjacent to the existing child block.
    #[error("seeker detached from child block")]
    DetachedSeeker,
    /// The write target is allocated soup owned by another organism.
    #[error("write target not owned")]
    WriteDenied,
    /// Division by zero.
    #[error("division by zero")]
    DivisionByZero,
    /// A block operation needs a child block that does not exist.
    #[error("organism owns no child block")]
    MissingChildBlock,
}

/// Register named by a modifier byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegId {
    Rax,
    Rbx,
    Rcx,
    Rdx,
}

impl RegId {
    const fn from_mod(inst: Inst) -> Option<Self> {
        match inst {
            Inst::Moda => Some(Self::Rax),
            Inst::Modb => Some(Self::Rbx),
            Inst::Modc => Some(Self::Rcx),
            Inst::Modd => Some(Self::Rdx),
            _ => None,
        }
    }

    const fn read(self, proc: &Process) -> u32 {
        match self {
            Self::Rax => proc.rax,
            Self::Rbx => proc.rbx,
            Self::Rcx => proc.rcx,
            Self::Rdx => proc.rdx,
        }
    }

    fn write(self, proc: &mut Process, value: u32) {
        match self {
            Self::Rax => proc.rax = value,
            Self::Rbx => proc.rbx = value,
            Self::Rcx => proc.rcx = value,
            Self::Rdx => proc.rdx = value,
        }
    }
}

/// Runs one full interpreter pass: every live organism executes one
/// instruction, newest first, then the reaper culls from the head until
/// the soup is back under capacity.
pub(crate) fn cycle_all(
    memory: &mut WorldMemory,
    procs: &mut ProcessTable,
    channel: &mut CommonChannel,
) {
    if procs.count() == 0 {
        return;
    }

    let mut machine = Machine {
        memory,
        procs,
        channel,
    };

    // Walk the queue from tail to head. Births during the walk extend
    // the tail but never run this cycle, and the head only moves when
    // the reaper runs after the walk, so every live organism executes
    // exactly once.
    let mut pidx = machine.procs.tail();
    machine.step(pidx);
    while pidx != machine.procs.head() {
        pidx = pidx.wrapping_sub(1) % machine.procs.capacity();
        machine.step(pidx);
    }

    while machine.memory.is_over_capacity() {
        machine.procs.reap(machine.memory);
    }
}

struct Machine<'a> {
    memory: &'a mut WorldMemory,
    procs: &'a mut ProcessTable,
    channel: &'a mut CommonChannel,
}

impl Machine<'_> {
    /// Executes one instruction for the organism in slot `pidx`.
    fn step(&mut self, pidx: u32) {
        debug_assert!(!self.procs.is_free(pidx));
        let inst = self.memory.inst_at(self.procs.slot(pidx).ip);

        let outcome = match inst {
            Inst::Jmpb => self.jump(pidx, false),
            Inst::Jmpf => self.jump(pidx, true),
            Inst::Adrb => self.addr(pidx, false),
            Inst::Adrf => self.addr(pidx, true),
            Inst::Malb => self.alloc(pidx, false),
            Inst::Malf => self.alloc(pidx, true),
            Inst::Swap => self.swap(pidx),
            Inst::Splt => self.split(pidx),
            Inst::Incn
            | Inst::Decn
            | Inst::Shfl
            | Inst::Shfr
            | Inst::Zero
            | Inst::Unit
            | Inst::Notn => self.one_reg_op(pidx, inst),
            Inst::Ifnz => self.if_not_zero(pidx),
            Inst::Sumn | Inst::Subn | Inst::Muln | Inst::Divn => self.three_reg_op(pidx, inst),
            Inst::Load => self.load(pidx),
            Inst::Wrte => self.write(pidx),
            Inst::Send => self.send(pidx),
            Inst::Recv => self.receive(pidx),
            Inst::Pshn => self.push(pidx),
            Inst::Popn => self.pop(pidx),
            Inst::Nop0 | Inst::Nop1 | Inst::Moda | Inst::Modb | Inst::Modc | Inst::Modd => {
                self.increment_ip(pidx);
                Ok(())
            }
        };

        // A fault consumes the instruction: advance past it and move on.
        if outcome.is_err() {
            self.increment_ip(pidx);
        }
    }

    /// Advances `ip` one cell, clamped at the top of the soup, and
    /// drags the seeker along with it.
    fn increment_ip(&mut self, pidx: u32) {
        let next = self.procs.slot(pidx).ip + 1;
        let valid = self.memory.is_address_valid(next);
        let proc = self.procs.slot_mut(pidx);
        if valid {
            proc.ip = next;
        }
        proc.sp = proc.ip;
    }

    /// Moves the seeker one cell in the given direction, clamped at
    /// both ends of the soup.
    fn increment_sp(&mut self, pidx: u32, forward: bool) {
        let sp = self.procs.slot(pidx).sp;
        let next = if forward {
            sp + 1
        } else {
            sp.wrapping_sub(1)
        };
        if self.memory.is_address_valid(next) {
            self.procs.slot_mut(pidx).sp = next;
        }
    }

    /// Resolves the `N` modifier bytes following `ip` into registers.
    fn resolve_regs<const N: usize>(&self, pidx: u32) -> Result<[RegId; N], Fault> {
        let ip = self.procs.slot(pidx).ip;
        let mut regs = [RegId::Rax; N];
        for (ridx, reg) in regs.iter_mut().enumerate() {
            let mod_addr = ip + 1 + ridx as u32;
            if !self.memory.is_address_valid(mod_addr) {
                return Err(Fault::MissingModifier);
            }
            *reg = RegId::from_mod(self.memory.inst_at(mod_addr)).ok_or(Fault::MissingModifier)?;
        }
        Ok(regs)
    }

    fn reg(&self, pidx: u32, reg: RegId) -> u32 {
        reg.read(self.procs.slot(pidx))
    }

    fn set_reg(&mut self, pidx: u32, reg: RegId, value: u32) {
        reg.write(self.procs.slot_mut(pidx), value);
    }

    /// Jump seek: one seeker step per cycle toward the complement of
    /// the template at `ip + 1`; commits by teleporting `ip` onto the
    /// seeker.
    fn jump(&mut self, pidx: u32, forward: bool) -> Result<(), Fault> {
        if self.seek_template(pidx, forward, 1)? {
            let sp = self.procs.slot(pidx).sp;
            self.procs.slot_mut(pidx).ip = sp;
        }
        Ok(())
    }

    /// Address seek: like a jump, but the template sits at `ip + 2`
    /// behind one modifier, and the commit stores the seeker address in
    /// that register instead of moving `ip`.
    fn addr(&mut self, pidx: u32, forward: bool) -> Result<(), Fault> {
        if self.seek_template(pidx, forward, 2)? {
            let [reg] = self.resolve_regs::<1>(pidx)?;
            let sp = self.procs.slot(pidx).sp;
            self.set_reg(pidx, reg, sp);
            self.increment_ip(pidx);
        }
        Ok(())
    }

    /// Shared seek step for jumps and searches. The source template
    /// starts `offset` cells past `ip` (faulting when absent); a
    /// non-matching cycle moves the seeker one step and reports no
    /// commit.
    fn seek_template(&mut self, pidx: u32, forward: bool, offset: u32) -> Result<bool, Fault> {
        let ip = self.procs.slot(pidx).ip;
        let source = ip + offset;
        for probe in (ip + 1)..source {
            if !self.memory.is_address_valid(probe) || !self.memory.inst_at(probe).is_mod() {
                return Err(Fault::MissingModifier);
            }
        }
        if !self.memory.is_address_valid(source) || !self.memory.inst_at(source).is_template() {
            return Err(Fault::MissingTemplate);
        }

        if templates_complement(self.memory, source, self.procs.slot(pidx).sp) {
            return Ok(true);
        }

        self.increment_sp(pidx, forward);
        Ok(false)
    }

    /// Child-block allocation, one cell per cycle. Each call does
    /// exactly one of: commit (child block matches the requested size),
    /// collision recovery (seeker hit allocated soup, child block is
    /// abandoned), or growth (claim the cell under the seeker and step
    /// on).
    fn alloc(&mut self, pidx: u32, forward: bool) -> Result<(), Fault> {
        let [size_reg, addr_reg] = self.resolve_regs::<2>(pidx)?;
        let block_size = self.reg(pidx, size_reg);
        if block_size == 0 {
            return Err(Fault::EmptyAllocation);
        }

        let proc = *self.procs.slot(pidx);
        if proc.mb2s != 0 {
            let expected = if forward {
                proc.mb2a + proc.mb2s
            } else {
                proc.mb2a.wrapping_sub(1)
            };
            if proc.sp != expected {
                return Err(Fault::DetachedSeeker);
            }
        }

        if proc.mb2s == block_size {
            self.increment_ip(pidx);
            self.set_reg(pidx, addr_reg, proc.mb2a);
            return Ok(());
        }

        if self.memory.is_allocated(proc.sp) {
            if proc.mb2s != 0 {
                self.procs.free_child_block(self.memory, pidx);
            }
            self.increment_sp(pidx, forward);
            return Ok(());
        }

        self.memory.set_allocated(proc.sp);
        let slot = self.procs.slot_mut(pidx);
        if slot.mb2s == 0 || !forward {
            slot.mb2a = slot.sp;
        }
        slot.mb2s += 1;
        self.increment_sp(pidx, forward);
        Ok(())
    }

    /// Swaps the organism's own block with its child block.
    fn swap(&mut self, pidx: u32) -> Result<(), Fault> {
        if self.procs.slot(pidx).mb2s == 0 {
            return Err(Fault::MissingChildBlock);
        }
        let slot = self.procs.slot_mut(pidx);
        std::mem::swap(&mut slot.mb1a, &mut slot.mb2a);
        std::mem::swap(&mut slot.mb1s, &mut slot.mb2s);
        self.increment_ip(pidx);
        Ok(())
    }

    /// Splits the child block off as a newborn organism. The parent's
    /// own slot is the queue lock, so its index survives any growth the
    /// birth triggers.
    fn split(&mut self, pidx: u32) -> Result<(), Fault> {
        let proc = *self.procs.slot(pidx);
        if proc.mb2s == 0 {
            return Err(Fault::MissingChildBlock);
        }
        self.procs
            .create(self.memory, proc.mb2a, proc.mb2s, pidx, false);
        let slot = self.procs.slot_mut(pidx);
        slot.mb2a = 0;
        slot.mb2s = 0;
        self.increment_ip(pidx);
        Ok(())
    }

    fn one_reg_op(&mut self, pidx: u32, inst: Inst) -> Result<(), Fault> {
        let [reg] = self.resolve_regs::<1>(pidx)?;
        let value = self.reg(pidx, reg);
        let result = match inst {
            Inst::Incn => value.wrapping_add(1),
            Inst::Decn => value.wrapping_sub(1),
            Inst::Shfl => value << 1,
            Inst::Shfr => value >> 1,
            Inst::Zero => 0,
            Inst::Unit => 1,
            Inst::Notn => u32::from(value == 0),
            _ => unreachable!("dispatched a non-unary opcode"),
        };
        self.set_reg(pidx, reg, result);
        self.increment_ip(pidx);
        Ok(())
    }

    /// Conditional skip: with a zero register the following instruction
    /// is stepped over, leaving `ip` past modifier and skipped opcode.
    fn if_not_zero(&mut self, pidx: u32) -> Result<(), Fault> {
        let [reg] = self.resolve_regs::<1>(pidx)?;
        if self.reg(pidx, reg) == 0 {
            self.increment_ip(pidx);
        }
        self.increment_ip(pidx);
        self.increment_ip(pidx);
        Ok(())
    }

    fn three_reg_op(&mut self, pidx: u32, inst: Inst) -> Result<(), Fault> {
        let [dst, lhs, rhs] = self.resolve_regs::<3>(pidx)?;
        let a = self.reg(pidx, lhs);
        let b = self.reg(pidx, rhs);
        let result = match inst {
            Inst::Sumn => a.wrapping_add(b),
            Inst::Subn => a.wrapping_sub(b),
            Inst::Muln => a.wrapping_mul(b),
            Inst::Divn => {
                if b == 0 {
                    return Err(Fault::DivisionByZero);
                }
                a / b
            }
            _ => unreachable!("dispatched a non-arithmetic opcode"),
        };
        self.set_reg(pidx, dst, result);
        self.increment_ip(pidx);
        Ok(())
    }

    /// Load travel: the seeker walks to the target address one cell per
    /// cycle; on arrival the opcode there lands in the value register.
    fn load(&mut self, pidx: u32) -> Result<(), Fault> {
        let [addr_reg, value_reg] = self.resolve_regs::<2>(pidx)?;
        let target = self.reg(pidx, addr_reg);
        if !self.memory.is_address_valid(target) {
            return Err(Fault::InvalidAddress);
        }

        let sp = self.procs.slot(pidx).sp;
        if sp < target {
            self.increment_sp(pidx, true);
        } else if sp > target {
            self.increment_sp(pidx, false);
        } else {
            let value = self.memory.inst_at(target) as u32;
            self.set_reg(pidx, value_reg, value);
            self.increment_ip(pidx);
        }
        Ok(())
    }

    /// Write travel: like a load, but on arrival the write is permission
    /// checked. An organism may write to unallocated soup and to its own
    /// two blocks, nowhere else.
    fn write(&mut self, pidx: u32) -> Result<(), Fault> {
        let [addr_reg, value_reg] = self.resolve_regs::<2>(pidx)?;
        let target = self.reg(pidx, addr_reg);
        if !self.memory.is_address_valid(target) {
            return Err(Fault::InvalidAddress);
        }
        let value = self.reg(pidx, value_reg);
        let inst = u8::try_from(value)
            .ok()
            .and_then(Inst::from_u8)
            .ok_or(Fault::InvalidInstruction)?;

        let sp = self.procs.slot(pidx).sp;
        if sp < target {
            self.increment_sp(pidx, true);
        } else if sp > target {
            self.increment_sp(pidx, false);
        } else if self.is_writeable_by(pidx, target) {
            self.memory.set_inst(target, inst);
            self.increment_ip(pidx);
        } else {
            return Err(Fault::WriteDenied);
        }
        Ok(())
    }

    fn is_writeable_by(&self, pidx: u32, address: u32) -> bool {
        if !self.memory.is_allocated(address) {
            return true;
        }
        let proc = self.procs.slot(pidx);
        let in_mb1 = address >= proc.mb1a && address < proc.mb1a + proc.mb1s;
        let in_mb2 = address >= proc.mb2a && address < proc.mb2a + proc.mb2s;
        in_mb1 || in_mb2
    }

    fn send(&mut self, pidx: u32) -> Result<(), Fault> {
        let [reg] = self.resolve_regs::<1>(pidx)?;
        let value = self.reg(pidx, reg);
        let inst = u8::try_from(value)
            .ok()
            .and_then(Inst::from_u8)
            .ok_or(Fault::InvalidInstruction)?;
        self.channel.send(inst);
        self.increment_ip(pidx);
        Ok(())
    }

    fn receive(&mut self, pidx: u32) -> Result<(), Fault> {
        let [reg] = self.resolve_regs::<1>(pidx)?;
        let inst = self.channel.receive();
        self.set_reg(pidx, reg, inst as u32);
        self.increment_ip(pidx);
        Ok(())
    }

    fn push(&mut self, pidx: u32) -> Result<(), Fault> {
        let [reg] = self.resolve_regs::<1>(pidx)?;
        let value = self.reg(pidx, reg);
        let stack = &mut self.procs.slot_mut(pidx).stack;
        for sidx in (1..8).rev() {
            stack[sidx] = stack[sidx - 1];
        }
        stack[0] = value;
        self.increment_ip(pidx);
        Ok(())
    }

    fn pop(&mut self, pidx: u32) -> Result<(), Fault> {
        let [reg] = self.resolve_regs::<1>(pidx)?;
        let stack = &mut self.procs.slot_mut(pidx).stack;
        let value = stack[0];
        for sidx in 1..8 {
            stack[sidx - 1] = stack[sidx];
        }
        stack[7] = 0;
        self.set_reg(pidx, reg, value);
        self.increment_ip(pidx);
        Ok(())
    }
}

/// Checks whether the template starting at `source` is mirrored, cell
/// by cell, by its complement at `target`: every `NOP0` against a
/// `NOP1` and vice versa, for the full length of the source run.
fn templates_complement(memory: &WorldMemory, source: u32, target: u32) -> bool {
    debug_assert!(memory.is_address_valid(source));
    debug_assert!(memory.inst_at(source).is_template());

    let mut src = source;
    let mut tgt = target;
    while memory.is_address_valid(src) && memory.inst_at(src).is_template() {
        if !memory.is_address_valid(tgt) {
            return false;
        }
        let wanted = match memory.inst_at(src) {
            Inst::Nop0 => Inst::Nop1,
            _ => Inst::Nop0,
        };
        if memory.inst_at(tgt) != wanted {
            return false;
        }
        src += 1;
        tgt += 1;
    }

    true
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{cycle_all, templates_complement, Machine};
    use crate::channel::CommonChannel;
    use crate::instset::Inst;
    use crate::memory::WorldMemory;
    use crate::process::ProcessTable;

    /// Writes a program into the soup starting at `origin`.
    fn poke(memory: &mut WorldMemory, origin: u32, program: &[Inst]) {
        for (offset, inst) in program.iter().enumerate() {
            memory.set_inst(origin + offset as u32, *inst);
        }
    }

    fn world_with_organism(order: u32, address: u32, size: u32) -> (WorldMemory, ProcessTable) {
        let mut memory = WorldMemory::new(order);
        let mut procs = ProcessTable::new();
        procs.spawn(&mut memory, address, size);
        (memory, procs)
    }

    fn run_cycles(memory: &mut WorldMemory, procs: &mut ProcessTable, cycles: u32) {
        let mut channel = CommonChannel::new();
        for _ in 0..cycles {
            cycle_all(memory, procs, &mut channel);
        }
    }

    #[test]
    fn conditional_skips_next_instruction_on_zero() {
        let (mut memory, mut procs) = world_with_organism(8, 10, 4);
        poke(&mut memory, 10, &[Inst::Ifnz, Inst::Moda, Inst::Nop0, Inst::Nop0]);

        run_cycles(&mut memory, &mut procs, 1);
        assert_eq!(procs.get(0).ip, 13);
        assert_eq!(procs.get(0).sp, 13);
    }

    #[test]
    fn conditional_falls_through_on_nonzero() {
        let (mut memory, mut procs) = world_with_organism(8, 10, 4);
        poke(&mut memory, 10, &[Inst::Ifnz, Inst::Moda, Inst::Nop0, Inst::Nop0]);
        procs.slot_mut(0).rax = 1;

        run_cycles(&mut memory, &mut procs, 1);
        assert_eq!(procs.get(0).ip, 12);
    }

    #[test]
    fn jump_travels_one_cell_per_cycle_then_commits() {
        let (mut memory, mut procs) = world_with_organism(8, 0, 3);
        poke(&mut memory, 0, &[Inst::Jmpf, Inst::Nop0, Inst::Nop1]);
        // Close off the source template so it spans exactly two cells.
        memory.set_inst(3, Inst::Swap);
        poke(&mut memory, 20, &[Inst::Nop1, Inst::Nop0]);
        memory.set_inst(22, Inst::Swap);

        // Twenty cycles of pure travel: the seeker inches toward the
        // complement while the instruction pointer stays put.
        run_cycles(&mut memory, &mut procs, 20);
        assert_eq!(procs.get(0).ip, 0);
        assert_eq!(procs.get(0).sp, 20);

        // The twenty-first cycle finds the complement under the seeker.
        run_cycles(&mut memory, &mut procs, 1);
        assert_eq!(procs.get(0).ip, 20);
    }

    #[test]
    fn jump_faults_without_a_template_and_drags_the_seeker() {
        let (mut memory, mut procs) = world_with_organism(8, 0, 2);
        poke(&mut memory, 0, &[Inst::Jmpf, Inst::Swap]);
        procs.slot_mut(0).sp = 50;

        run_cycles(&mut memory, &mut procs, 1);
        // The fault advances ip, and the seeker snaps back onto it.
        assert_eq!(procs.get(0).ip, 1);
        assert_eq!(procs.get(0).sp, 1);
    }

    #[test]
    fn backward_jump_finds_a_complement_behind_the_seeker() {
        let (mut memory, mut procs) = world_with_organism(8, 30, 3);
        poke(&mut memory, 30, &[Inst::Jmpb, Inst::Nop1, Inst::Swap]);
        poke(&mut memory, 25, &[Inst::Nop0, Inst::Swap]);

        // Seeker starts on ip (30) and walks back to 25.
        run_cycles(&mut memory, &mut procs, 5);
        assert_eq!(procs.get(0).ip, 30);
        assert_eq!(procs.get(0).sp, 25);
        run_cycles(&mut memory, &mut procs, 1);
        assert_eq!(procs.get(0).ip, 25);
    }

    #[test]
    fn address_search_stores_the_complement_address() {
        let (mut memory, mut procs) = world_with_organism(8, 0, 4);
        poke(&mut memory, 0, &[Inst::Adrf, Inst::Modb, Inst::Nop0, Inst::Swap]);
        poke(&mut memory, 9, &[Inst::Nop1, Inst::Swap]);

        // Nine travel cycles bring the seeker from 0 to 9.
        run_cycles(&mut memory, &mut procs, 9);
        assert_eq!(procs.get(0).ip, 0);
        assert_eq!(procs.get(0).sp, 9);

        run_cycles(&mut memory, &mut procs, 1);
        let proc = procs.get(0);
        assert_eq!(proc.rbx, 9);
        assert_eq!(proc.ip, 1);
        assert_eq!(proc.sp, 1);
    }

    #[test]
    fn forward_allocation_grows_cell_by_cell_then_commits() {
        let (mut memory, mut procs) = world_with_organism(8, 0, 8);
        poke(&mut memory, 0, &[Inst::Malf, Inst::Moda, Inst::Modb]);
        {
            let slot = procs.slot_mut(0);
            slot.rax = 3;
            slot.sp = 8;
        }

        // Three growth cycles claim cells 8..11.
        run_cycles(&mut memory, &mut procs, 3);
        let proc = procs.get(0);
        assert_eq!(proc.mb2a, 8);
        assert_eq!(proc.mb2s, 3);
        assert_eq!(proc.sp, 11);
        assert_eq!(proc.ip, 0);
        assert_eq!(memory.allocated(), 11);

        // The next cycle sees the block complete and commits.
        run_cycles(&mut memory, &mut procs, 1);
        let proc = procs.get(0);
        assert_eq!(proc.rbx, 8);
        assert_eq!(proc.ip, 1);
        procs.validate(&memory);
    }

    #[test]
    fn backward_allocation_anchors_the_block_at_the_seeker() {
        let (mut memory, mut procs) = world_with_organism(8, 20, 8);
        poke(&mut memory, 20, &[Inst::Malb, Inst::Moda, Inst::Modb]);
        {
            let slot = procs.slot_mut(0);
            slot.rax = 2;
            slot.sp = 19;
        }

        run_cycles(&mut memory, &mut procs, 2);
        let proc = procs.get(0);
        assert_eq!(proc.mb2a, 18);
        assert_eq!(proc.mb2s, 2);
        assert_eq!(proc.sp, 17);

        run_cycles(&mut memory, &mut procs, 1);
        assert_eq!(procs.get(0).rbx, 18);
        procs.validate(&memory);
    }

    #[test]
    fn allocation_collision_abandons_the_child_block() {
        let (mut memory, mut procs) = world_with_organism(8, 0, 4);
        poke(&mut memory, 0, &[Inst::Malf, Inst::Moda, Inst::Modb]);
        memory.set_allocated(6);
        {
            let slot = procs.slot_mut(0);
            slot.rax = 3;
            slot.sp = 4;
        }

        // Cells 4 and 5 accrue, then the collision at 6 dumps them.
        run_cycles(&mut memory, &mut procs, 3);
        let proc = procs.get(0);
        assert_eq!(proc.mb2s, 0);
        assert_eq!(proc.sp, 7);
        assert_eq!(memory.allocated(), 5);

        // Growth resumes past the obstacle.
        run_cycles(&mut memory, &mut procs, 3);
        assert_eq!(procs.get(0).mb2a, 7);
        assert_eq!(procs.get(0).mb2s, 3);
    }

    #[test]
    fn allocation_faults_when_the_seeker_detaches() {
        let (mut memory, mut procs) = world_with_organism(8, 0, 4);
        poke(&mut memory, 0, &[Inst::Malf, Inst::Moda, Inst::Modb]);
        {
            let slot = procs.slot_mut(0);
            slot.rax = 4;
            slot.mb2a = 10;
            slot.mb2s = 2;
            slot.sp = 20;
        }
        memory.set_allocated(10);
        memory.set_allocated(11);

        run_cycles(&mut memory, &mut procs, 1);
        // Fault: ip moves on, the partial child block stays.
        let proc = procs.get(0);
        assert_eq!(proc.ip, 1);
        assert_eq!(proc.mb2s, 2);
    }

    #[rstest]
    #[case(Inst::Incn, 7, 8)]
    #[case(Inst::Decn, 0, u32::MAX)]
    #[case(Inst::Shfl, 3, 6)]
    #[case(Inst::Shfr, 7, 3)]
    #[case(Inst::Zero, 1234, 0)]
    #[case(Inst::Unit, 1234, 1)]
    #[case(Inst::Notn, 0, 1)]
    #[case(Inst::Notn, 9, 0)]
    fn unary_ops_update_the_named_register(
        #[case] inst: Inst,
        #[case] input: u32,
        #[case] expected: u32,
    ) {
        let (mut memory, mut procs) = world_with_organism(8, 0, 2);
        poke(&mut memory, 0, &[inst, Inst::Modc]);
        procs.slot_mut(0).rcx = input;

        run_cycles(&mut memory, &mut procs, 1);
        assert_eq!(procs.get(0).rcx, expected);
        assert_eq!(procs.get(0).ip, 1);
    }

    #[rstest]
    #[case(Inst::Sumn, 7, 5, 12)]
    #[case(Inst::Subn, 5, 7, u32::MAX - 1)]
    #[case(Inst::Muln, 6, 7, 42)]
    #[case(Inst::Divn, 42, 5, 8)]
    fn arithmetic_targets_the_first_register(
        #[case] inst: Inst,
        #[case] lhs: u32,
        #[case] rhs: u32,
        #[case] expected: u32,
    ) {
        let (mut memory, mut procs) = world_with_organism(8, 0, 4);
        poke(&mut memory, 0, &[inst, Inst::Moda, Inst::Modb, Inst::Modc]);
        {
            let slot = procs.slot_mut(0);
            slot.rbx = lhs;
            slot.rcx = rhs;
        }

        run_cycles(&mut memory, &mut procs, 1);
        assert_eq!(procs.get(0).rax, expected);
    }

    #[test]
    fn division_by_zero_faults_and_leaves_the_registers() {
        let (mut memory, mut procs) = world_with_organism(8, 0, 4);
        poke(&mut memory, 0, &[Inst::Divn, Inst::Moda, Inst::Modb, Inst::Modc]);
        procs.slot_mut(0).rbx = 42;

        run_cycles(&mut memory, &mut procs, 1);
        let proc = procs.get(0);
        assert_eq!(proc.rax, 0);
        assert_eq!(proc.ip, 1);

        // The stranded modifiers execute as no-ops on later cycles.
        run_cycles(&mut memory, &mut procs, 3);
        assert_eq!(procs.get(0).ip, 4);
        assert_eq!(procs.get(0).rax, 0);
    }

    #[test]
    fn missing_modifier_faults_the_instruction() {
        let (mut memory, mut procs) = world_with_organism(8, 0, 2);
        poke(&mut memory, 0, &[Inst::Incn, Inst::Swap]);
        run_cycles(&mut memory, &mut procs, 1);
        assert_eq!(procs.get(0).rax, 0);
        assert_eq!(procs.get(0).ip, 1);
    }

    #[test]
    fn load_travels_to_the_target_then_reads() {
        let (mut memory, mut procs) = world_with_organism(8, 0, 3);
        poke(&mut memory, 0, &[Inst::Load, Inst::Moda, Inst::Modb]);
        memory.set_inst(5, Inst::Splt);
        procs.slot_mut(0).rax = 5;

        run_cycles(&mut memory, &mut procs, 5);
        assert_eq!(procs.get(0).sp, 5);
        assert_eq!(procs.get(0).ip, 0);

        run_cycles(&mut memory, &mut procs, 1);
        let proc = procs.get(0);
        assert_eq!(proc.rbx, Inst::Splt as u32);
        assert_eq!(proc.ip, 1);
    }

    #[test]
    fn write_respects_ownership() {
        let (mut memory, mut procs) = world_with_organism(8, 0, 3);
        poke(&mut memory, 0, &[Inst::Wrte, Inst::Moda, Inst::Modb]);
        // A second organism owns cell 5.
        procs.spawn(&mut memory, 5, 1);
        {
            let slot = procs.slot_mut(0);
            slot.rax = 5;
            slot.rbx = Inst::Splt as u32;
            slot.sp = 5;
        }

        run_cycles(&mut memory, &mut procs, 1);
        // Arrival cycle: permission denied, nothing written.
        assert_eq!(memory.inst_at(5), Inst::Nop0);
        assert_eq!(procs.get(0).ip, 1);
    }

    #[test]
    fn write_lands_on_unallocated_soup() {
        let (mut memory, mut procs) = world_with_organism(8, 0, 3);
        poke(&mut memory, 0, &[Inst::Wrte, Inst::Moda, Inst::Modb]);
        {
            let slot = procs.slot_mut(0);
            slot.rax = 9;
            slot.rbx = Inst::Jmpf as u32;
            slot.sp = 9;
        }

        run_cycles(&mut memory, &mut procs, 1);
        assert_eq!(memory.inst_at(9), Inst::Jmpf);
        assert_eq!(procs.get(0).ip, 1);
        memory.validate();
    }

    #[test]
    fn write_rejects_non_opcode_values() {
        let (mut memory, mut procs) = world_with_organism(8, 0, 3);
        poke(&mut memory, 0, &[Inst::Wrte, Inst::Moda, Inst::Modb]);
        {
            let slot = procs.slot_mut(0);
            slot.rax = 9;
            slot.rbx = 32;
            slot.sp = 9;
        }

        run_cycles(&mut memory, &mut procs, 1);
        assert_eq!(memory.inst_at(9), Inst::Nop0);
        assert_eq!(procs.get(0).ip, 1);
    }

    #[test]
    fn stack_shifts_through_eight_slots() {
        let (mut memory, mut procs) = world_with_organism(8, 0, 4);
        poke(&mut memory, 0, &[Inst::Pshn, Inst::Moda, Inst::Popn, Inst::Modb]);
        procs.slot_mut(0).rax = 99;

        // Push, then the stranded modifier, then pop.
        run_cycles(&mut memory, &mut procs, 3);
        let proc = procs.get(0);
        assert_eq!(proc.rbx, 99);
        assert_eq!(proc.stack, [0; 8]);
        assert_eq!(proc.ip, 3);
    }

    #[test]
    fn push_discards_the_deepest_slot() {
        let (mut memory, mut procs) = world_with_organism(8, 0, 2);
        poke(&mut memory, 0, &[Inst::Pshn, Inst::Moda]);
        {
            let slot = procs.slot_mut(0);
            slot.rax = 42;
            slot.stack = [1, 2, 3, 4, 5, 6, 7, 8];
        }

        run_cycles(&mut memory, &mut procs, 1);
        assert_eq!(procs.get(0).stack, [42, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn swap_exchanges_the_blocks() {
        let (mut memory, mut procs) = world_with_organism(8, 0, 4);
        poke(&mut memory, 0, &[Inst::Swap]);
        for address in 10..13 {
            memory.set_allocated(address);
        }
        {
            let slot = procs.slot_mut(0);
            slot.mb2a = 10;
            slot.mb2s = 3;
        }

        run_cycles(&mut memory, &mut procs, 1);
        let proc = procs.get(0);
        assert_eq!((proc.mb1a, proc.mb1s), (10, 3));
        assert_eq!((proc.mb2a, proc.mb2s), (0, 4));
        assert_eq!(proc.ip, 1);
        procs.validate(&memory);
    }

    #[test]
    fn swap_without_a_child_block_faults() {
        let (mut memory, mut procs) = world_with_organism(8, 0, 4);
        poke(&mut memory, 0, &[Inst::Swap]);
        run_cycles(&mut memory, &mut procs, 1);
        let proc = procs.get(0);
        assert_eq!((proc.mb1a, proc.mb1s), (0, 4));
        assert_eq!(proc.ip, 1);
    }

    #[test]
    fn split_births_the_child_as_the_newest_organism() {
        let (mut memory, mut procs) = world_with_organism(8, 0, 4);
        poke(&mut memory, 0, &[Inst::Splt]);
        for address in 10..13 {
            memory.set_allocated(address);
        }
        {
            let slot = procs.slot_mut(0);
            slot.mb2a = 10;
            slot.mb2s = 3;
        }

        run_cycles(&mut memory, &mut procs, 1);
        assert_eq!(procs.count(), 2);
        let parent_idx = procs.head();
        let child_idx = procs.tail();
        let parent = procs.get(parent_idx);
        assert_eq!((parent.mb2a, parent.mb2s), (0, 0));
        let child = procs.get(child_idx);
        assert_eq!((child.mb1a, child.mb1s), (10, 3));
        assert_eq!(child.ip, 10);
        assert_eq!(child.sp, 10);
        procs.validate(&memory);
    }

    #[test]
    fn newborns_wait_a_cycle_before_executing() {
        let (mut memory, mut procs) = world_with_organism(8, 0, 4);
        poke(&mut memory, 0, &[Inst::Splt]);
        memory.set_inst(10, Inst::Incn);
        memory.set_inst(11, Inst::Moda);
        for address in 10..13 {
            memory.set_allocated(address);
        }
        {
            let slot = procs.slot_mut(0);
            slot.mb2a = 10;
            slot.mb2s = 3;
        }

        // The split happens mid-cycle; the child must not run yet.
        run_cycles(&mut memory, &mut procs, 1);
        let child_idx = procs.tail();
        assert_eq!(procs.get(child_idx).ip, 10);
        assert_eq!(procs.get(child_idx).rax, 0);

        run_cycles(&mut memory, &mut procs, 1);
        assert_eq!(procs.get(child_idx).rax, 1);
        assert_eq!(procs.get(child_idx).ip, 11);
    }

    #[test]
    fn reaper_culls_the_oldest_under_memory_pressure() {
        // Order-4 soup: 16 cells, capacity 8. Two 5-cell organisms
        // exceed capacity, so the older one dies after the cycle.
        let mut memory = WorldMemory::new(4);
        let mut procs = ProcessTable::new();
        procs.spawn(&mut memory, 0, 5);
        procs.spawn(&mut memory, 5, 5);
        assert!(memory.is_over_capacity());

        run_cycles(&mut memory, &mut procs, 1);
        assert_eq!(procs.count(), 1);
        assert_eq!(memory.allocated(), 5);
        assert!(!memory.is_allocated(0));
        assert!(memory.is_allocated(5));
        procs.validate(&memory);
    }

    #[test]
    fn ip_clamps_at_the_top_of_the_soup() {
        let (mut memory, mut procs) = world_with_organism(4, 14, 2);
        procs.slot_mut(0).ip = 15;
        procs.slot_mut(0).sp = 15;

        run_cycles(&mut memory, &mut procs, 3);
        assert_eq!(procs.get(0).ip, 15);
        assert_eq!(procs.get(0).sp, 15);
    }

    #[test]
    fn complement_check_matches_mirrored_runs() {
        let mut memory = WorldMemory::new(6);
        poke(&mut memory, 0, &[Inst::Nop0, Inst::Nop1, Inst::Nop1]);
        memory.set_inst(3, Inst::Swap);
        poke(&mut memory, 10, &[Inst::Nop1, Inst::Nop0, Inst::Nop0]);
        memory.set_inst(13, Inst::Swap);

        assert!(templates_complement(&memory, 0, 10));
        assert!(!templates_complement(&memory, 0, 11));
        // A template equal to the source is not its complement.
        assert!(!templates_complement(&memory, 0, 0));
    }

    #[test]
    fn complement_fails_when_the_target_runs_off_the_soup() {
        let mut memory = WorldMemory::new(3);
        poke(&mut memory, 0, &[Inst::Nop0, Inst::Nop0]);
        memory.set_inst(2, Inst::Swap);
        // Target starting on the last cell cannot mirror two cells.
        memory.set_inst(7, Inst::Nop1);
        assert!(!templates_complement(&memory, 0, 7));
    }

    #[test]
    fn send_and_receive_use_the_channel() {
        use crate::channel::{Receiver, Sender};
        use std::cell::RefCell;
        use std::rc::Rc;

        struct Tap(Rc<RefCell<Vec<Inst>>>);
        impl Sender for Tap {
            fn send(&mut self, inst: Inst) {
                self.0.borrow_mut().push(inst);
            }
        }
        struct Feed;
        impl Receiver for Feed {
            fn receive(&mut self) -> Inst {
                Inst::Unit
            }
        }

        let (mut memory, mut procs) = world_with_organism(8, 0, 4);
        poke(&mut memory, 0, &[Inst::Send, Inst::Moda, Inst::Recv, Inst::Modb]);
        procs.slot_mut(0).rax = Inst::Splt as u32;

        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut channel = CommonChannel::new();
        channel.set_sender(Box::new(Tap(Rc::clone(&seen))));
        channel.set_receiver(Box::new(Feed));

        // Send, the stranded modifier, then receive.
        cycle_all(&mut memory, &mut procs, &mut channel);
        cycle_all(&mut memory, &mut procs, &mut channel);
        cycle_all(&mut memory, &mut procs, &mut channel);

        assert_eq!(*seen.borrow(), vec![Inst::Splt]);
        assert_eq!(procs.get(0).rbx, Inst::Unit as u32);
    }

    #[test]
    fn send_faults_on_a_non_opcode_register() {
        let (mut memory, mut procs) = world_with_organism(8, 0, 2);
        poke(&mut memory, 0, &[Inst::Send, Inst::Moda]);
        procs.slot_mut(0).rax = 1000;

        run_cycles(&mut memory, &mut procs, 1);
        assert_eq!(procs.get(0).ip, 1);
    }

    #[test]
    fn machine_reg_roundtrip_covers_all_four_registers() {
        use super::RegId;

        let (mut memory, mut procs) = world_with_organism(8, 0, 2);
        let mut channel = CommonChannel::new();
        let mut machine = Machine {
            memory: &mut memory,
            procs: &mut procs,
            channel: &mut channel,
        };

        for (value, reg) in [RegId::Rax, RegId::Rbx, RegId::Rcx, RegId::Rdx]
            .into_iter()
            .enumerate()
        {
            machine.set_reg(0, reg, value as u32 + 10);
            assert_eq!(machine.reg(0, reg), value as u32 + 10);
        }
    }
}
