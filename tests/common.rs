#![allow(unused_imports)]
#![allow(dead_code)]

use ml5238_async_rs::{registers::*, LatchKind, RegisterAccess};
use std::cell::RefCell;
use std::rc::Rc;

#[cfg(not(feature = "async"))]
use embedded_hal::delay::DelayNs;
#[cfg(feature = "async")]
use embedded_hal_async::delay::DelayNs;

/// Error returned by the simulated bus while failure injection is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusError;

/// Everything that crossed the simulated bus, plus delays, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Read(Register, u8),
    Write(Register, u8),
    DelayNs(u64),
}

/// Register-level model of the ML5238.
///
/// Stores only the writable bits of each register. Comparator outputs,
/// interrupt latches, STATUS and PUPIN are derived on read the way the device
/// gates them.
#[derive(Debug, Default)]
pub struct DeviceState {
    stored: [u8; REGISTER_COUNT],
    /// Latch bits of PSENSE and RSENSE.
    latches: [u8; 2],
    short_current_input: bool,
    load_open_input: bool,
    charger_open_low_input: bool,
    charger_open_high_input: bool,
    pupin: bool,
    powered_down: bool,
    failing: bool,
    noop_corruption: u8,
    raise_after_read: Option<LatchKind>,
    pupin_after_power_read: bool,
    balance_violation_seen: bool,
    events: Vec<Event>,
}

fn latch_slot(reg: Register) -> usize {
    match reg {
        Register::Psense => 0,
        _ => 1,
    }
}

impl DeviceState {
    fn compose(&self, reg: Register) -> u8 {
        match reg {
            Register::Psense | Register::Rsense => {
                let stored = self.stored[reg.index()] & reg.writable_mask();
                let mut raw = stored | self.latches[latch_slot(reg)];
                for kind in LatchKind::ALL.iter().filter(|k| k.register() == reg) {
                    if self.input(*kind) {
                        raw |= kind.status_mask();
                    }
                    // stopped comparator: latch and output read 0
                    if stored & kind.enable_mask() == 0 {
                        raw &= !(kind.latch_mask() | kind.status_mask());
                    }
                    if stored & kind.interrupt_enable_mask() == 0 {
                        raw &= !kind.latch_mask();
                    }
                }
                raw
            }
            Register::Power => {
                let mut raw = self.stored[reg.index()] & reg.writable_mask();
                if self.pupin {
                    raw |= PowerFlags::PUPIN.bits();
                }
                raw
            }
            Register::Status => {
                let rsense = self.compose(Register::Rsense);
                let psense = self.compose(Register::Psense);
                let fet = self.compose(Register::Fet);
                let power = self.compose(Register::Power);
                let mut status = StatusFlags::empty();
                status.set(StatusFlags::RSC, rsense & RsenseFlags::RSC.bits() != 0);
                status.set(StatusFlags::RRS, rsense & RsenseFlags::RRS.bits() != 0);
                status.set(StatusFlags::RPSH, psense & PsenseFlags::RPSH.bits() != 0);
                status.set(StatusFlags::RPSL, psense & PsenseFlags::RPSL.bits() != 0);
                status.set(
                    StatusFlags::INT,
                    (rsense | psense) & (RsenseFlags::LATCHES.bits()) != 0,
                );
                status.set(StatusFlags::PSV, power & PowerFlags::PSV.bits() != 0);
                status.set(StatusFlags::CF, fet & FetFlags::CF.bits() != 0);
                status.set(StatusFlags::DF, fet & FetFlags::DF.bits() != 0);
                status.bits()
            }
            Register::Noop => self.stored[reg.index()] ^ self.noop_corruption,
            _ => self.stored[reg.index()] & reg.writable_mask(),
        }
    }

    fn balance_bits(&self) -> u16 {
        ((self.stored[Register::Cbalh.index()] as u16) << 8)
            | self.stored[Register::Cball.index()] as u16
    }

    fn input(&self, kind: LatchKind) -> bool {
        match kind {
            LatchKind::ShortCurrent => self.short_current_input,
            LatchKind::LoadOpen => self.load_open_input,
            LatchKind::ChargerOpenLow => self.charger_open_low_input,
            LatchKind::ChargerOpenHigh => self.charger_open_high_input,
        }
    }

    fn store(&mut self, reg: Register, value: u8) {
        let writable = reg.writable_mask();
        let index = reg.index();
        self.stored[index] = (self.stored[index] & !writable) | (value & writable);

        let latches = reg.clear_on_zero_mask();
        if latches != 0 {
            self.latches[latch_slot(reg)] &= value | !latches;
        }

        match reg {
            Register::Cbalh | Register::Cball => {
                let mask = self.balance_bits();
                if mask & (mask >> 1) != 0 {
                    self.balance_violation_seen = true;
                }
            }
            Register::Power => {
                if value & PowerFlags::PSV.bits() != 0 {
                    self.stop_for_power_save();
                }
                self.try_power_down();
            }
            _ => {}
        }
    }

    /// Power save stops both PSENSE comparators and the load open comparator.
    fn stop_for_power_save(&mut self) {
        let stopped = [
            LatchKind::LoadOpen,
            LatchKind::ChargerOpenLow,
            LatchKind::ChargerOpenHigh,
        ];
        for kind in stopped {
            let reg = kind.register();
            self.stored[reg.index()] &= !(kind.enable_mask() | kind.interrupt_enable_mask());
            self.latches[latch_slot(reg)] &= !kind.latch_mask();
        }
    }

    fn try_power_down(&mut self) {
        let power = self.stored[Register::Power.index()];
        if power & PowerFlags::PDWN.bits() != 0 && !self.pupin {
            self.powered_down = true;
        }
    }

    /// Sets `kind`'s latch if the comparator and its interrupt are enabled. A
    /// confirmed short current also turns off both FETs.
    fn raise(&mut self, kind: LatchKind) {
        let reg = kind.register();
        let stored = self.stored[reg.index()];
        if stored & kind.enable_mask() == 0 {
            return;
        }
        if kind == LatchKind::ShortCurrent {
            self.stored[Register::Fet.index()] &= !(FetFlags::CF | FetFlags::DF).bits();
        }
        if stored & kind.interrupt_enable_mask() != 0 {
            self.latches[latch_slot(reg)] |= kind.latch_mask();
        }
    }
}

/// Shared handle to a simulated device. The driver owns one clone, the test
/// keeps another to drive inputs and inspect the bus log.
#[derive(Clone, Default)]
pub struct SimulatedMl5238 {
    state: Rc<RefCell<DeviceState>>,
}

impl SimulatedMl5238 {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self, reg: Register) -> Result<u8, BusError> {
        let mut state = self.state.borrow_mut();
        if state.failing || state.powered_down {
            return Err(BusError);
        }
        let value = state.compose(reg);
        state.events.push(Event::Read(reg, value));
        if let Some(kind) = state.raise_after_read {
            if kind.register() == reg {
                state.raise_after_read = None;
                state.raise(kind);
            }
        }
        if reg == Register::Power && state.pupin_after_power_read {
            state.pupin_after_power_read = false;
            state.pupin = true;
        }
        Ok(value)
    }

    fn write(&self, reg: Register, value: u8) -> Result<(), BusError> {
        let mut state = self.state.borrow_mut();
        if state.failing || state.powered_down {
            return Err(BusError);
        }
        state.events.push(Event::Write(reg, value));
        state.store(reg, value);
        Ok(())
    }

    /// Sets a register directly, bypassing the bus log.
    pub fn poke(&self, reg: Register, value: u8) {
        let mut state = self.state.borrow_mut();
        let index = reg.index();
        state.stored[index] = value & reg.writable_mask();
    }

    /// Register value as the driver would read it, without logging.
    pub fn peek(&self, reg: Register) -> u8 {
        self.state.borrow().compose(reg)
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.borrow().events.clone()
    }

    pub fn writes(&self) -> Vec<(Register, u8)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Write(reg, value) => Some((reg, value)),
                _ => None,
            })
            .collect()
    }

    pub fn clear_log(&self) {
        self.state.borrow_mut().events.clear();
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.borrow_mut().failing = failing;
    }

    /// XORs `mask` into every NOOP read.
    pub fn corrupt_noop(&self, mask: u8) {
        self.state.borrow_mut().noop_corruption = mask;
    }

    /// Voltage across the sense resistor exceeds the SETSC level. The output
    /// bit follows at once; the latch waits for `complete_short_delay`.
    pub fn set_short_current(&self, present: bool) {
        self.state.borrow_mut().short_current_input = present;
    }

    /// The CDLY delay ran out with the short still present.
    pub fn complete_short_delay(&self) {
        let mut state = self.state.borrow_mut();
        if state.short_current_input {
            state.raise(LatchKind::ShortCurrent);
        }
    }

    pub fn set_load_open(&self, present: bool) {
        let mut state = self.state.borrow_mut();
        state.load_open_input = present;
        if present {
            state.raise(LatchKind::LoadOpen);
        }
    }

    /// Charger removed: both PSENSE comparators report it.
    pub fn set_charger_disconnected(&self, disconnected: bool) {
        let mut state = self.state.borrow_mut();
        state.charger_open_high_input = disconnected;
        state.charger_open_low_input = disconnected;
        if disconnected {
            state.raise(LatchKind::ChargerOpenHigh);
            state.raise(LatchKind::ChargerOpenLow);
        }
    }

    /// Raises `kind`'s latch right after the next read of its register, i.e.
    /// in the middle of a read-modify-write.
    pub fn raise_after_next_read(&self, kind: LatchKind) {
        self.state.borrow_mut().raise_after_read = Some(kind);
    }

    /// /PUPIN held low. Releasing it lets a pending power-down through.
    pub fn set_pupin(&self, asserted: bool) {
        let mut state = self.state.borrow_mut();
        state.pupin = asserted;
        state.try_power_down();
    }

    /// /PUPIN goes low right after the next POWER read.
    pub fn set_pupin_after_next_power_read(&self) {
        self.state.borrow_mut().pupin_after_power_read = true;
    }

    pub fn powered_down(&self) -> bool {
        self.state.borrow().powered_down
    }

    /// Power-down exit: every register back at its reset value.
    pub fn wake(&self) {
        let mut state = self.state.borrow_mut();
        state.powered_down = false;
        state.stored = [RESET_VALUE; REGISTER_COUNT];
        state.latches = [0; 2];
    }

    pub fn balance_violation_seen(&self) -> bool {
        self.state.borrow().balance_violation_seen
    }

    /// Delay that records into this device's bus log.
    pub fn delay(&self) -> SimDelay {
        SimDelay {
            state: self.state.clone(),
        }
    }
}

#[cfg(not(feature = "async"))]
impl RegisterAccess for SimulatedMl5238 {
    type Error = BusError;

    fn read_register(&mut self, reg: Register) -> Result<u8, Self::Error> {
        self.read(reg)
    }

    fn write_register(&mut self, reg: Register, value: u8) -> Result<(), Self::Error> {
        self.write(reg, value)
    }
}

#[cfg(feature = "async")]
impl RegisterAccess for SimulatedMl5238 {
    type Error = BusError;

    async fn read_register(&mut self, reg: Register) -> Result<u8, Self::Error> {
        self.read(reg)
    }

    async fn write_register(&mut self, reg: Register, value: u8) -> Result<(), Self::Error> {
        self.write(reg, value)
    }
}

pub struct SimDelay {
    state: Rc<RefCell<DeviceState>>,
}

impl SimDelay {
    fn record(&mut self, ns: u64) {
        self.state.borrow_mut().events.push(Event::DelayNs(ns));
    }
}

#[cfg(not(feature = "async"))]
impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.record(ns as u64);
    }

    fn delay_us(&mut self, us: u32) {
        self.record(us as u64 * 1_000);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.record(ms as u64 * 1_000_000);
    }
}

#[cfg(feature = "async")]
impl DelayNs for SimDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.record(ns as u64);
    }

    async fn delay_us(&mut self, us: u32) {
        self.record(us as u64 * 1_000);
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.record(ms as u64 * 1_000_000);
    }
}

/// Position of the first event matching `f`.
pub fn position(events: &[Event], f: impl Fn(&Event) -> bool) -> usize {
    events
        .iter()
        .position(f)
        .unwrap_or_else(|| panic!("event not found in {events:?}"))
}
