//! Protection comparators and their interrupt latches.
//!
//! PSENSE and RSENSE each hold two comparators with the same nibble layout:
//! run enable, interrupt enable, interrupt latch, live comparator output.
//! The device gates the nibble itself: with the comparator stopped the latch
//! and the output read 0, with the interrupt disabled the latch reads 0.

#[cfg(feature = "defmt")]
use defmt::Format;

use crate::data_types::FetControl;
use crate::registers::Register;

/// Interrupt enable must follow comparator enable by more than 1 ms.
pub const COMPARATOR_WARMUP_MS: u32 = 2;

const ENABLE: u8 = 1 << 3;
const INTERRUPT_ENABLE: u8 = 1 << 2;
const LATCHED: u8 = 1 << 1;
const STATUS: u8 = 1 << 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum LatchKind {
    /// ESC/ISC/RSC/SC in RSENSE
    ShortCurrent,
    /// ERS/IRS/RRS/RS in RSENSE
    LoadOpen,
    /// EPSL/IPSL/RPSL/PSL in PSENSE, 0.2V threshold
    ChargerOpenLow,
    /// EPSH/IPSH/RPSH/PSH in PSENSE, VDD x 0.75 threshold
    ChargerOpenHigh,
}

impl LatchKind {
    pub const ALL: [LatchKind; 4] = [
        LatchKind::ShortCurrent,
        LatchKind::LoadOpen,
        LatchKind::ChargerOpenLow,
        LatchKind::ChargerOpenHigh,
    ];

    pub fn register(&self) -> Register {
        match self {
            LatchKind::ShortCurrent | LatchKind::LoadOpen => Register::Rsense,
            LatchKind::ChargerOpenLow | LatchKind::ChargerOpenHigh => Register::Psense,
        }
    }

    fn shift(&self) -> u8 {
        match self {
            LatchKind::ShortCurrent | LatchKind::ChargerOpenHigh => 4,
            LatchKind::LoadOpen | LatchKind::ChargerOpenLow => 0,
        }
    }

    pub fn enable_mask(&self) -> u8 {
        ENABLE << self.shift()
    }

    pub fn interrupt_enable_mask(&self) -> u8 {
        INTERRUPT_ENABLE << self.shift()
    }

    pub fn latch_mask(&self) -> u8 {
        LATCHED << self.shift()
    }

    pub fn status_mask(&self) -> u8 {
        STATUS << self.shift()
    }

    /// Registers the device changes on its own when this latch sets.
    ///
    /// A confirmed short current clears CF and DF in the FET register. The
    /// FETs stay off until the host turns them on again.
    pub fn fan_out(&self) -> &'static [Register] {
        match self {
            LatchKind::ShortCurrent => &[Register::Fet],
            _ => &[],
        }
    }

    fn index(&self) -> usize {
        match self {
            LatchKind::ShortCurrent => 0,
            LatchKind::LoadOpen => 1,
            LatchKind::ChargerOpenLow => 2,
            LatchKind::ChargerOpenHigh => 3,
        }
    }
}

/// One comparator nibble as read from PSENSE or RSENSE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct ProtectionLatch {
    pub enable: bool,
    pub interrupt_enable: bool,
    pub latched: bool,
    /// Live comparator output
    pub status: bool,
}

impl ProtectionLatch {
    pub fn from_nibble(nibble: u8) -> Self {
        Self {
            enable: nibble & ENABLE != 0,
            interrupt_enable: nibble & INTERRUPT_ENABLE != 0,
            latched: nibble & LATCHED != 0,
            status: nibble & STATUS != 0,
        }
    }

    pub fn to_nibble(&self) -> u8 {
        let mut nibble = 0;
        if self.enable {
            nibble |= ENABLE;
        }
        if self.interrupt_enable {
            nibble |= INTERRUPT_ENABLE;
        }
        if self.latched {
            nibble |= LATCHED;
        }
        if self.status {
            nibble |= STATUS;
        }
        nibble
    }

    /// Extracts `kind`'s nibble from a raw PSENSE/RSENSE byte.
    pub fn from_register(kind: LatchKind, raw: u8) -> Self {
        Self::from_nibble(raw >> kind.shift())
    }

    /// Puts this nibble into `raw` at `kind`'s position.
    pub fn merge_into(&self, kind: LatchKind, raw: u8) -> u8 {
        let shift = kind.shift();
        (raw & !(0x0F << shift)) | (self.to_nibble() << shift)
    }

    /// A stopped comparator is Disabled even if stale bits are set.
    pub fn state(&self) -> LatchState {
        if !self.enable {
            LatchState::Disabled
        } else if self.latched {
            LatchState::Latched
        } else {
            LatchState::Armed
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum LatchState {
    #[default]
    Disabled,
    Armed,
    Latched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct LatchTransition {
    pub kind: LatchKind,
    pub from: LatchState,
    pub to: LatchState,
}

impl LatchTransition {
    /// Registers to re-read because the device changed them as part of this
    /// transition.
    pub fn fan_out(&self) -> &'static [Register] {
        if self.to == LatchState::Latched && self.from != LatchState::Latched {
            self.kind.fan_out()
        } else {
            &[]
        }
    }
}

/// Last observed state of every latch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct ProtectionMonitor {
    states: [LatchState; 4],
}

impl ProtectionMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, kind: LatchKind) -> LatchState {
        self.states[kind.index()]
    }

    /// Records a read-back and reports the transition, if any.
    pub fn observe(&mut self, kind: LatchKind, latch: ProtectionLatch) -> Option<LatchTransition> {
        let from = self.states[kind.index()];
        let to = latch.state();
        self.states[kind.index()] = to;
        if from == to {
            return None;
        }
        #[cfg(feature = "defmt")]
        defmt::debug!("{}: {} -> {}", kind, from, to);
        Some(LatchTransition { kind, from, to })
    }

    /// Records a whole PSENSE or RSENSE read-back.
    pub fn observe_register(
        &mut self,
        register: Register,
        raw: u8,
    ) -> heapless::Vec<LatchTransition, 2> {
        let mut transitions = heapless::Vec::new();
        for kind in LatchKind::ALL.iter().filter(|k| k.register() == register) {
            if let Some(transition) = self.observe(*kind, ProtectionLatch::from_register(*kind, raw))
            {
                // two latches per register
                let _ = transitions.push(transition);
            }
        }
        transitions
    }

    /// Everything stops on reset and power-down.
    pub fn reset(&mut self) {
        self.states = [LatchState::Disabled; 4];
    }
}

/// Byte to write to PSENSE/RSENSE.
///
/// Latch bits are clear-on-zero. Every latch not listed in `clear` is written
/// as 1, which the device ignores, so a latch that sets between the read and
/// the write of a read-modify-write is never lost.
pub fn latch_write_value(register: Register, encoded: u8, clear: u8) -> u8 {
    let latches = register.clear_on_zero_mask();
    (encoded & !latches) | (latches & !clear)
}

/// Result of polling the protection registers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProtectionPoll {
    pub transitions: heapless::Vec<LatchTransition, 4>,
    /// FET register re-read because a transition fanned out into it.
    pub fets: Option<FetControl>,
}

impl ProtectionPoll {
    pub fn newly_latched(&self, kind: LatchKind) -> bool {
        self.transitions
            .iter()
            .any(|t| t.kind == kind && t.to == LatchState::Latched)
    }
}
