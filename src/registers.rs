use bitflags::bitflags;

#[cfg(feature = "defmt")]
use defmt::Format;

/// ML5238 control registers. Addresses above `0x0A` are test registers and are
/// deliberately not representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[repr(u8)]
pub enum Register {
    /// Scratch register, no function. Reads back what was written.
    Noop = 0x00,
    /// Cell voltage monitor output selection
    Vmon = 0x01,
    /// Current measurement amplifier setting
    Imon = 0x02,
    /// Charge/discharge FET driver control
    Fet = 0x03,
    /// PSENSE pin comparators (charger open detection)
    Psense = 0x04,
    /// Short current detection and RSENSE pin comparator (load open detection)
    Rsense = 0x05,
    /// Power save / power down control
    Power = 0x06,
    /// Internal status, read-only
    Status = 0x07,
    /// Cell balancing switches SW16..SW9
    Cbalh = 0x08,
    /// Cell balancing switches SW8..SW1
    Cball = 0x09,
    /// Short current detecting voltage
    Setsc = 0x0A,
}

/// Number of defined control registers.
pub const REGISTER_COUNT: usize = 11;

/// Value of every register after reset or power-down recovery.
pub const RESET_VALUE: u8 = 0x00;

/// Per-bit access mode of a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum AccessMode {
    /// Written value is stored and read back.
    ReadWrite,
    /// Writes are ignored by the device. Includes reserved bits.
    ReadOnly,
    /// Interrupt latch: writing 0 clears it, writing 1 is ignored.
    ClearOnZero,
}

impl Register {
    pub const ALL: [Register; REGISTER_COUNT] = [
        Register::Noop,
        Register::Vmon,
        Register::Imon,
        Register::Fet,
        Register::Psense,
        Register::Rsense,
        Register::Power,
        Register::Status,
        Register::Cbalh,
        Register::Cball,
        Register::Setsc,
    ];

    pub const fn address(self) -> u8 {
        self as u8
    }

    /// Looks up a register by bus address. Test addresses return `None`.
    pub const fn from_address(address: u8) -> Option<Self> {
        match address {
            0x00 => Some(Register::Noop),
            0x01 => Some(Register::Vmon),
            0x02 => Some(Register::Imon),
            0x03 => Some(Register::Fet),
            0x04 => Some(Register::Psense),
            0x05 => Some(Register::Rsense),
            0x06 => Some(Register::Power),
            0x07 => Some(Register::Status),
            0x08 => Some(Register::Cbalh),
            0x09 => Some(Register::Cball),
            0x0A => Some(Register::Setsc),
            _ => None,
        }
    }

    /// Position of the register in shadow tables.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Bits whose written value is stored by the device.
    pub const fn writable_mask(self) -> u8 {
        match self {
            Register::Noop | Register::Cbalh | Register::Cball => 0xFF,
            Register::Vmon => VmonFlags::WRITABLE.bits(),
            Register::Imon => ImonFlags::WRITABLE.bits(),
            Register::Fet => FetFlags::WRITABLE.bits(),
            Register::Psense => PsenseFlags::WRITABLE.bits(),
            Register::Rsense => RsenseFlags::WRITABLE.bits(),
            Register::Power => PowerFlags::WRITABLE.bits(),
            Register::Status => 0x00,
            Register::Setsc => SetscFlags::WRITABLE.bits(),
        }
    }

    /// Interrupt latch bits: cleared by writing 0, untouched by writing 1.
    pub const fn clear_on_zero_mask(self) -> u8 {
        match self {
            Register::Psense => PsenseFlags::LATCHES.bits(),
            Register::Rsense => RsenseFlags::LATCHES.bits(),
            _ => 0x00,
        }
    }

    /// Bits the device ignores on write, reserved bits included.
    pub const fn read_only_mask(self) -> u8 {
        !(self.writable_mask() | self.clear_on_zero_mask())
    }

    pub const fn access(self, bit: u8) -> AccessMode {
        let mask = 1u8 << (bit & 0x07);
        if self.clear_on_zero_mask() & mask != 0 {
            AccessMode::ClearOnZero
        } else if self.writable_mask() & mask != 0 {
            AccessMode::ReadWrite
        } else {
            AccessMode::ReadOnly
        }
    }

    /// Registers mixing writable and non-writable bits, or sharing a logical
    /// value with a sibling register, are only ever written through a
    /// read-modify-write.
    pub const fn requires_read_modify_write(self) -> bool {
        matches!(
            self,
            Register::Fet
                | Register::Psense
                | Register::Rsense
                | Register::Power
                | Register::Cbalh
                | Register::Cball
                | Register::Setsc
        )
    }
}

bitflags! {
    /// VMON register (0x01)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VmonFlags: u8 {
        const OUT = 1 << 4;
        const CN3 = 1 << 3;
        const CN2 = 1 << 2;
        const CN1 = 1 << 1;
        const CN0 = 1 << 0;
        const CELL = 0b0000_1111;
        const WRITABLE = 0b0001_1111;
    }
}

bitflags! {
    /// IMON register (0x02)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ImonFlags: u8 {
        const OUT = 1 << 4;
        const GCAL1 = 1 << 3;
        const GCAL0 = 1 << 2;
        const ZERO = 1 << 1;
        const GIM = 1 << 0;
        const WRITABLE = 0b0001_1111;
    }
}

bitflags! {
    /// FET register (0x03)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FetFlags: u8 {
        const DRV = 1 << 4;
        const CF = 1 << 1;
        const DF = 1 << 0;
        const WRITABLE = 0b0001_0011;
    }
}

bitflags! {
    /// PSENSE register (0x04)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PsenseFlags: u8 {
        /// High threshold (VDD x 0.75) comparator run
        const EPSH = 1 << 7;
        const IPSH = 1 << 6;
        const RPSH = 1 << 5;
        const PSH = 1 << 4;
        /// Low threshold (0.2V) comparator run
        const EPSL = 1 << 3;
        const IPSL = 1 << 2;
        const RPSL = 1 << 1;
        const PSL = 1 << 0;
        const WRITABLE = 0b1100_1100;
        const LATCHES = 0b0010_0010;
    }
}

bitflags! {
    /// RSENSE register (0x05)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RsenseFlags: u8 {
        /// Short current detection run
        const ESC = 1 << 7;
        const ISC = 1 << 6;
        const RSC = 1 << 5;
        const SC = 1 << 4;
        /// Load open comparator run
        const ERS = 1 << 3;
        const IRS = 1 << 2;
        const RRS = 1 << 1;
        const RS = 1 << 0;
        const WRITABLE = 0b1100_1100;
        const LATCHES = 0b0010_0010;
    }
}

bitflags! {
    /// POWER register (0x06)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PowerFlags: u8 {
        /// /PUPIN pin is held low
        const PUPIN = 1 << 7;
        const PDWN = 1 << 4;
        const PSV = 1 << 0;
        const WRITABLE = 0b0001_0001;
    }
}

bitflags! {
    /// STATUS register (0x07), read-only
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusFlags: u8 {
        const RSC = 1 << 7;
        const RRS = 1 << 6;
        const RPSH = 1 << 5;
        const RPSL = 1 << 4;
        const INT = 1 << 3;
        const PSV = 1 << 2;
        const CF = 1 << 1;
        const DF = 1 << 0;
    }
}

bitflags! {
    /// SETSC register (0x0A)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SetscFlags: u8 {
        const SC1 = 1 << 1;
        const SC0 = 1 << 0;
        const WRITABLE = 0b0000_0011;
    }
}

/// Number of cell balancing switches (SW1..SW16).
pub const NUM_BALANCE_SWITCHES: usize = 16;

/// Number of monitored cells (V1..V16).
pub const NUM_CELLS: usize = 16;
