//! The 32-opcode instruction set of the Vivarium virtual machine.
//!
//! Every soup cell carries one opcode in its low five bits, so all 32
//! five-bit values decode to a defined instruction. The numeric ordinals
//! are load-bearing: save files store raw cells and the cosmic-ray
//! operator draws `rand % 32`, so reordering this enum changes the
//! meaning of existing worlds.

/// Number of defined opcodes. Exactly fills the five-bit cell field.
pub const INST_COUNT: usize = 32;

/// A single Vivarium opcode.
///
/// `NOP0`/`NOP1` double as template constructors, `MODA..MODD` select
/// registers for the instruction that precedes them, and everything else
/// is executable. Unlisted cell values cannot exist: a cell's low five
/// bits always name one of these 32 variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum Inst {
    /// `.` Template constructor.
    Nop0 = 0,
    /// `:` Template constructor.
    Nop1 = 1,
    /// `a` Register modifier.
    Moda = 2,
    /// `b` Register modifier.
    Modb = 3,
    /// `c` Register modifier.
    Modc = 4,
    /// `d` Register modifier.
    Modd = 5,
    /// `(` Jump back to template complement.
    Jmpb = 6,
    /// `)` Jump forward to template complement.
    Jmpf = 7,
    /// `[` Search back for template complement.
    Adrb = 8,
    /// `]` Search forward for template complement.
    Adrf = 9,
    /// `{` Allocate backward.
    Malb = 10,
    /// `}` Allocate forward.
    Malf = 11,
    /// `%` Swap memory blocks.
    Swap = 12,
    /// `$` Split child memory block into a new organism.
    Splt = 13,
    /// `^` Increment register.
    Incn = 14,
    /// `v` Decrement register.
    Decn = 15,
    /// `0` Zero out register.
    Zero = 16,
    /// `1` Place one on register.
    Unit = 17,
    /// `!` Logical negation.
    Notn = 18,
    /// `?` Skip next instruction if register is zero.
    Ifnz = 19,
    /// `+` Add two registers.
    Sumn = 20,
    /// `-` Subtract two registers.
    Subn = 21,
    /// `*` Multiply two registers.
    Muln = 22,
    /// `/` Divide two registers.
    Divn = 23,
    /// `L` Load instruction from memory.
    Load = 24,
    /// `W` Write instruction into memory.
    Wrte = 25,
    /// `S` Send instruction to the common channel.
    Send = 26,
    /// `R` Receive instruction from the common channel.
    Recv = 27,
    /// `#` Push register onto the stack.
    Pshn = 28,
    /// `~` Pop stack into register.
    Popn = 29,
    /// `<` Shift register left.
    Shfl = 30,
    /// `>` Shift register right.
    Shfr = 31,
}

/// Returns `true` when a register-sized word holds a valid opcode value.
#[must_use]
pub const fn is_inst(word: u32) -> bool {
    word < INST_COUNT as u32
}

impl Inst {
    /// All opcodes in ordinal order.
    pub const ALL: [Self; INST_COUNT] = [
        Self::Nop0,
        Self::Nop1,
        Self::Moda,
        Self::Modb,
        Self::Modc,
        Self::Modd,
        Self::Jmpb,
        Self::Jmpf,
        Self::Adrb,
        Self::Adrf,
        Self::Malb,
        Self::Malf,
        Self::Swap,
        Self::Splt,
        Self::Incn,
        Self::Decn,
        Self::Zero,
        Self::Unit,
        Self::Notn,
        Self::Ifnz,
        Self::Sumn,
        Self::Subn,
        Self::Muln,
        Self::Divn,
        Self::Load,
        Self::Wrte,
        Self::Send,
        Self::Recv,
        Self::Pshn,
        Self::Popn,
        Self::Shfl,
        Self::Shfr,
    ];

    /// Returns the stable ordinal of this opcode (`0..=31`).
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Decodes a byte holding an exact opcode value.
    #[must_use]
    pub const fn from_u8(byte: u8) -> Option<Self> {
        if byte < INST_COUNT as u8 {
            Some(Self::from_low_bits(byte))
        } else {
            None
        }
    }

    /// Decodes the low five bits of a raw soup cell. Total: every cell
    /// value maps to a defined opcode.
    #[must_use]
    pub const fn from_low_bits(byte: u8) -> Self {
        Self::ALL[(byte & 0x1f) as usize]
    }

    /// Returns `true` for the template constructors `NOP0`/`NOP1`.
    #[must_use]
    pub const fn is_template(self) -> bool {
        matches!(self, Self::Nop0 | Self::Nop1)
    }

    /// Returns `true` for the register modifiers `MODA..MODD`.
    #[must_use]
    pub const fn is_mod(self) -> bool {
        matches!(self, Self::Moda | Self::Modb | Self::Modc | Self::Modd)
    }

    /// One-character glyph used by hosts when dumping soup regions.
    #[must_use]
    pub const fn symbol(self) -> char {
        match self {
            Self::Nop0 => '.',
            Self::Nop1 => ':',
            Self::Moda => 'a',
            Self::Modb => 'b',
            Self::Modc => 'c',
            Self::Modd => 'd',
            Self::Jmpb => '(',
            Self::Jmpf => ')',
            Self::Adrb => '[',
            Self::Adrf => ']',
            Self::Malb => '{',
            Self::Malf => '}',
            Self::Swap => '%',
            Self::Splt => '$',
            Self::Incn => '^',
            Self::Decn => 'v',
            Self::Zero => '0',
            Self::Unit => '1',
            Self::Notn => '!',
            Self::Ifnz => '?',
            Self::Sumn => '+',
            Self::Subn => '-',
            Self::Muln => '*',
            Self::Divn => '/',
            Self::Load => 'L',
            Self::Wrte => 'W',
            Self::Send => 'S',
            Self::Recv => 'R',
            Self::Pshn => '#',
            Self::Popn => '~',
            Self::Shfl => '<',
            Self::Shfr => '>',
        }
    }

    /// Canonical four-letter mnemonic.
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::Nop0 => "NOP0",
            Self::Nop1 => "NOP1",
            Self::Moda => "MODA",
            Self::Modb => "MODB",
            Self::Modc => "MODC",
            Self::Modd => "MODD",
            Self::Jmpb => "JMPB",
            Self::Jmpf => "JMPF",
            Self::Adrb => "ADRB",
            Self::Adrf => "ADRF",
            Self::Malb => "MALB",
            Self::Malf => "MALF",
            Self::Swap => "SWAP",
            Self::Splt => "SPLT",
            Self::Incn => "INCN",
            Self::Decn => "DECN",
            Self::Zero => "ZERO",
            Self::Unit => "UNIT",
            Self::Notn => "NOTN",
            Self::Ifnz => "IFNZ",
            Self::Sumn => "SUMN",
            Self::Subn => "SUBN",
            Self::Muln => "MULN",
            Self::Divn => "DIVN",
            Self::Load => "LOAD",
            Self::Wrte => "WRTE",
            Self::Send => "SEND",
            Self::Recv => "RECV",
            Self::Pshn => "PSHN",
            Self::Popn => "POPN",
            Self::Shfl => "SHFL",
            Self::Shfr => "SHFR",
        }
    }
}
