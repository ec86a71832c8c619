use crate::balance::BalanceMask;
use crate::protection::{LatchKind, ProtectionLatch};
use crate::registers::*;
use crate::units::{Capacitance, ElectricCurrent, ElectricPotential, ElectricalResistance, Time};
use uom::si::capacitance::nanofarad;
use uom::si::electric_potential::{millivolt, volt};
use uom::si::time::microsecond;

#[cfg(feature = "defmt")]
use defmt::Format;

/// Typed view of one register.
///
/// `decode` never fails. `encode` takes the byte previously read from the
/// device and keeps its read-only and reserved bits, so a view can only ever
/// change the bits the device actually stores.
pub trait RegisterView: Sized + Copy {
    const REGISTER: Register;

    fn decode(raw: u8) -> Self;

    /// Raw image of the view. Read-only positions are discarded by `encode`.
    fn fields(&self) -> u8;

    fn encode(&self, previous: u8) -> u8 {
        let keep = Self::REGISTER.read_only_mask();
        (previous & keep) | (self.fields() & !keep)
    }
}

/// NOOP scratch byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct Scratch(pub u8);

impl RegisterView for Scratch {
    const REGISTER: Register = Register::Noop;

    fn decode(raw: u8) -> Self {
        Self(raw)
    }

    fn fields(&self) -> u8 {
        self.0
    }
}

/// VMON pin cell selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct VmonSelect {
    /// OUT bit. When clear the VMON pin sits at 0V whatever `cell` says.
    pub enabled: bool,
    /// 0 = V1 (lowest) .. 15 = V16 (highest)
    pub cell: u8,
}

impl VmonSelect {
    /// The cell actually routed to the VMON pin.
    pub fn output_cell(&self) -> Option<u8> {
        self.enabled.then_some(self.cell)
    }
}

impl RegisterView for VmonSelect {
    const REGISTER: Register = Register::Vmon;

    fn decode(raw: u8) -> Self {
        let flags = VmonFlags::from_bits_retain(raw);
        Self {
            enabled: flags.contains(VmonFlags::OUT),
            cell: raw & VmonFlags::CELL.bits(),
        }
    }

    fn fields(&self) -> u8 {
        let mut raw = self.cell & VmonFlags::CELL.bits();
        if self.enabled {
            raw |= VmonFlags::OUT.bits();
        }
        raw
    }
}

/// Current measuring amplifier gain (GIM).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum ImonGain {
    #[default]
    X10,
    X50,
}

impl ImonGain {
    pub fn factor(&self) -> f32 {
        match self {
            ImonGain::X10 => 10.0,
            ImonGain::X50 => 50.0,
        }
    }
}

/// Gain correction routing selected by GCAL1:GCAL0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum GainCalibration {
    /// 00: ISP/ISM pin inputs, amplified output
    #[default]
    Measure,
    /// 01: internal reference (100mV at x10, 20mV at x50) on ISP, ISM at GND
    ReferenceInput,
    /// 10: pin inputs, IMON outputs the reference voltage
    ReferenceOutput,
    /// 11: reference on the inputs and on IMON
    ReferenceInputOutput,
}

/// IMON register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct ImonConfig {
    /// OUT bit, amplifier output on the IMON pin
    pub output: bool,
    pub gain: ImonGain,
    /// ZERO bit, both inputs tied to GND for offset correction
    pub zero: bool,
    /// Stored GCAL bits. See `effective_calibration`.
    pub calibration: GainCalibration,
}

impl ImonConfig {
    /// The device ignores GCAL while ZERO is set; `None` in that case.
    pub fn effective_calibration(&self) -> Option<GainCalibration> {
        (!self.zero).then_some(self.calibration)
    }

    /// Sense current from a measured IMON pin voltage.
    ///
    /// `V_IMON = I_SENSE * R_SENSE * GIM + 1.0V`
    pub fn sense_current(
        &self,
        imon: ElectricPotential,
        rsense: ElectricalResistance,
    ) -> ElectricCurrent {
        let offset = ElectricPotential::new::<volt>(1.0);
        (imon - offset) / (rsense * self.gain.factor())
    }
}

impl RegisterView for ImonConfig {
    const REGISTER: Register = Register::Imon;

    fn decode(raw: u8) -> Self {
        let flags = ImonFlags::from_bits_retain(raw);
        let calibration = match (
            flags.contains(ImonFlags::GCAL1),
            flags.contains(ImonFlags::GCAL0),
        ) {
            (false, false) => GainCalibration::Measure,
            (false, true) => GainCalibration::ReferenceInput,
            (true, false) => GainCalibration::ReferenceOutput,
            (true, true) => GainCalibration::ReferenceInputOutput,
        };
        Self {
            output: flags.contains(ImonFlags::OUT),
            gain: if flags.contains(ImonFlags::GIM) {
                ImonGain::X50
            } else {
                ImonGain::X10
            },
            zero: flags.contains(ImonFlags::ZERO),
            calibration,
        }
    }

    fn fields(&self) -> u8 {
        let mut flags = ImonFlags::empty();
        flags.set(ImonFlags::OUT, self.output);
        flags.set(ImonFlags::GIM, self.gain == ImonGain::X50);
        flags.set(ImonFlags::ZERO, self.zero);
        flags |= match self.calibration {
            GainCalibration::Measure => ImonFlags::empty(),
            GainCalibration::ReferenceInput => ImonFlags::GCAL0,
            GainCalibration::ReferenceOutput => ImonFlags::GCAL1,
            GainCalibration::ReferenceInputOutput => ImonFlags::GCAL1 | ImonFlags::GCAL0,
        };
        flags.bits()
    }
}

/// FET register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct FetControl {
    /// CF, C_FET pin driven. Cleared by the device on a short current.
    pub charge: bool,
    /// DF, D_FET pin driven. Cleared by the device on a short current.
    pub discharge: bool,
    /// DRV, enhanced gate drive. Clear again once the gates have risen.
    pub boost: bool,
}

impl FetControl {
    pub fn all_off(&self) -> bool {
        !self.charge && !self.discharge
    }
}

impl RegisterView for FetControl {
    const REGISTER: Register = Register::Fet;

    fn decode(raw: u8) -> Self {
        let flags = FetFlags::from_bits_retain(raw);
        Self {
            charge: flags.contains(FetFlags::CF),
            discharge: flags.contains(FetFlags::DF),
            boost: flags.contains(FetFlags::DRV),
        }
    }

    fn fields(&self) -> u8 {
        let mut flags = FetFlags::empty();
        flags.set(FetFlags::CF, self.charge);
        flags.set(FetFlags::DF, self.discharge);
        flags.set(FetFlags::DRV, self.boost);
        flags.bits()
    }
}

/// PSENSE register: the two charger-open comparators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct PsenseConfig {
    /// VDD x 0.75 threshold, used while the discharge FET is off
    pub high: ProtectionLatch,
    /// 0.2V threshold, used while the discharge FET is on
    pub low: ProtectionLatch,
}

impl PsenseConfig {
    /// Either comparator reports the charger as disconnected.
    pub fn charger_disconnected(&self) -> bool {
        self.high.status || self.low.status
    }
}

impl RegisterView for PsenseConfig {
    const REGISTER: Register = Register::Psense;

    fn decode(raw: u8) -> Self {
        Self {
            high: ProtectionLatch::from_nibble(raw >> 4),
            low: ProtectionLatch::from_nibble(raw),
        }
    }

    fn fields(&self) -> u8 {
        (self.high.to_nibble() << 4) | self.low.to_nibble()
    }
}

/// RSENSE register: short current detection and the load-open comparator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct RsenseConfig {
    pub short_current: ProtectionLatch,
    pub load_open: ProtectionLatch,
}

impl RegisterView for RsenseConfig {
    const REGISTER: Register = Register::Rsense;

    fn decode(raw: u8) -> Self {
        Self {
            short_current: ProtectionLatch::from_nibble(raw >> 4),
            load_open: ProtectionLatch::from_nibble(raw),
        }
    }

    fn fields(&self) -> u8 {
        (self.short_current.to_nibble() << 4) | self.load_open.to_nibble()
    }
}

/// POWER register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct PowerControl {
    pub power_save: bool,
    pub power_down: bool,
    /// PUPIN, read-only. The /PUPIN pin is low, which holds off power-down.
    pub wake_inhibit: bool,
}

impl RegisterView for PowerControl {
    const REGISTER: Register = Register::Power;

    fn decode(raw: u8) -> Self {
        let flags = PowerFlags::from_bits_retain(raw);
        Self {
            power_save: flags.contains(PowerFlags::PSV),
            power_down: flags.contains(PowerFlags::PDWN),
            wake_inhibit: flags.contains(PowerFlags::PUPIN),
        }
    }

    fn fields(&self) -> u8 {
        let mut flags = PowerFlags::empty();
        flags.set(PowerFlags::PSV, self.power_save);
        flags.set(PowerFlags::PDWN, self.power_down);
        flags.set(PowerFlags::PUPIN, self.wake_inhibit);
        flags.bits()
    }
}

/// STATUS register, decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct StatusSnapshot {
    /// RSC, short current interrupt latched
    pub short_current: bool,
    /// RRS, load open interrupt latched
    pub load_open: bool,
    /// RPSH, charger open (high threshold) interrupt latched
    pub charger_open_high: bool,
    /// RPSL, charger open (low threshold) interrupt latched
    pub charger_open_low: bool,
    /// INT, /INTO pin asserted
    pub interrupt: bool,
    /// PSV, in power save
    pub power_save: bool,
    /// CF, C_FET pin on
    pub charge_fet: bool,
    /// DF, D_FET pin on
    pub discharge_fet: bool,
}

impl StatusSnapshot {
    pub fn latched(&self, kind: LatchKind) -> bool {
        match kind {
            LatchKind::ShortCurrent => self.short_current,
            LatchKind::LoadOpen => self.load_open,
            LatchKind::ChargerOpenLow => self.charger_open_low,
            LatchKind::ChargerOpenHigh => self.charger_open_high,
        }
    }

    pub fn any_latched(&self) -> bool {
        self.short_current || self.load_open || self.charger_open_high || self.charger_open_low
    }
}

impl RegisterView for StatusSnapshot {
    const REGISTER: Register = Register::Status;

    fn decode(raw: u8) -> Self {
        let flags = StatusFlags::from_bits_retain(raw);
        Self {
            short_current: flags.contains(StatusFlags::RSC),
            load_open: flags.contains(StatusFlags::RRS),
            charger_open_high: flags.contains(StatusFlags::RPSH),
            charger_open_low: flags.contains(StatusFlags::RPSL),
            interrupt: flags.contains(StatusFlags::INT),
            power_save: flags.contains(StatusFlags::PSV),
            charge_fet: flags.contains(StatusFlags::CF),
            discharge_fet: flags.contains(StatusFlags::DF),
        }
    }

    fn fields(&self) -> u8 {
        let mut flags = StatusFlags::empty();
        flags.set(StatusFlags::RSC, self.short_current);
        flags.set(StatusFlags::RRS, self.load_open);
        flags.set(StatusFlags::RPSH, self.charger_open_high);
        flags.set(StatusFlags::RPSL, self.charger_open_low);
        flags.set(StatusFlags::INT, self.interrupt);
        flags.set(StatusFlags::PSV, self.power_save);
        flags.set(StatusFlags::CF, self.charge_fet);
        flags.set(StatusFlags::DF, self.discharge_fet);
        flags.bits()
    }
}

/// CBALH, switches SW16..SW9.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct BalanceHigh(pub u8);

impl RegisterView for BalanceHigh {
    const REGISTER: Register = Register::Cbalh;

    fn decode(raw: u8) -> Self {
        Self(raw)
    }

    fn fields(&self) -> u8 {
        self.0
    }
}

/// CBALL, switches SW8..SW1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct BalanceLow(pub u8);

impl RegisterView for BalanceLow {
    const REGISTER: Register = Register::Cball;

    fn decode(raw: u8) -> Self {
        Self(raw)
    }

    fn fields(&self) -> u8 {
        self.0
    }
}

/// Short current detecting voltage across the sense resistor (SETSC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[repr(u8)]
pub enum ShortThreshold {
    #[default]
    Threshold100mV = 0b00,
    Threshold200mV = 0b01,
    Threshold300mV = 0b10,
    Threshold400mV = 0b11,
}

impl ShortThreshold {
    pub const ALL: [ShortThreshold; 4] = [
        ShortThreshold::Threshold100mV,
        ShortThreshold::Threshold200mV,
        ShortThreshold::Threshold300mV,
        ShortThreshold::Threshold400mV,
    ];

    pub fn voltage(&self) -> ElectricPotential {
        let mv = match self {
            ShortThreshold::Threshold100mV => 100.0,
            ShortThreshold::Threshold200mV => 200.0,
            ShortThreshold::Threshold300mV => 300.0,
            ShortThreshold::Threshold400mV => 400.0,
        };
        ElectricPotential::new::<millivolt>(mv)
    }

    /// Pack current at which this level trips.
    pub fn trip_current(&self, rsense: ElectricalResistance) -> ElectricCurrent {
        self.voltage() / rsense
    }

    /// The level whose trip current is closest to `limit`.
    pub fn closest_for_current(limit: ElectricCurrent, rsense: ElectricalResistance) -> Self {
        let target_mv = (limit * rsense).get::<millivolt>();

        let mut closest = ShortThreshold::Threshold100mV;
        let mut min_diff = f32::MAX;
        for level in Self::ALL {
            let diff = (target_mv - level.voltage().get::<millivolt>()).abs();
            if diff < min_diff {
                min_diff = diff;
                closest = level;
            }
        }
        closest
    }
}

impl RegisterView for ShortThreshold {
    const REGISTER: Register = Register::Setsc;

    fn decode(raw: u8) -> Self {
        match raw & SetscFlags::WRITABLE.bits() {
            0b00 => ShortThreshold::Threshold100mV,
            0b01 => ShortThreshold::Threshold200mV,
            0b10 => ShortThreshold::Threshold300mV,
            _ => ShortThreshold::Threshold400mV,
        }
    }

    fn fields(&self) -> u8 {
        *self as u8
    }
}

/// Confirmation delay of a short current, set by the capacitor on CDLY.
///
/// `t_sc[us] = C_DLY[nF] * 100`
pub fn short_circuit_delay(cdly: Capacitance) -> Time {
    Time::new::<microsecond>(cdly.get::<nanofarad>() * 100.0)
}

/// Any register, decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum FieldView {
    Noop(Scratch),
    Vmon(VmonSelect),
    Imon(ImonConfig),
    Fet(FetControl),
    Psense(PsenseConfig),
    Rsense(RsenseConfig),
    Power(PowerControl),
    Status(StatusSnapshot),
    Cbalh(BalanceHigh),
    Cball(BalanceLow),
    Setsc(ShortThreshold),
}

impl FieldView {
    pub fn register(&self) -> Register {
        match self {
            FieldView::Noop(_) => Register::Noop,
            FieldView::Vmon(_) => Register::Vmon,
            FieldView::Imon(_) => Register::Imon,
            FieldView::Fet(_) => Register::Fet,
            FieldView::Psense(_) => Register::Psense,
            FieldView::Rsense(_) => Register::Rsense,
            FieldView::Power(_) => Register::Power,
            FieldView::Status(_) => Register::Status,
            FieldView::Cbalh(_) => Register::Cbalh,
            FieldView::Cball(_) => Register::Cball,
            FieldView::Setsc(_) => Register::Setsc,
        }
    }
}

pub fn decode(register: Register, raw: u8) -> FieldView {
    match register {
        Register::Noop => FieldView::Noop(Scratch::decode(raw)),
        Register::Vmon => FieldView::Vmon(VmonSelect::decode(raw)),
        Register::Imon => FieldView::Imon(ImonConfig::decode(raw)),
        Register::Fet => FieldView::Fet(FetControl::decode(raw)),
        Register::Psense => FieldView::Psense(PsenseConfig::decode(raw)),
        Register::Rsense => FieldView::Rsense(RsenseConfig::decode(raw)),
        Register::Power => FieldView::Power(PowerControl::decode(raw)),
        Register::Status => FieldView::Status(StatusSnapshot::decode(raw)),
        Register::Cbalh => FieldView::Cbalh(BalanceHigh::decode(raw)),
        Register::Cball => FieldView::Cball(BalanceLow::decode(raw)),
        Register::Setsc => FieldView::Setsc(ShortThreshold::decode(raw)),
    }
}

/// Raw byte to write for `view`, keeping the non-writable bits of `previous`.
pub fn encode(view: &FieldView, previous: u8) -> u8 {
    match view {
        FieldView::Noop(v) => v.encode(previous),
        FieldView::Vmon(v) => v.encode(previous),
        FieldView::Imon(v) => v.encode(previous),
        FieldView::Fet(v) => v.encode(previous),
        FieldView::Psense(v) => v.encode(previous),
        FieldView::Rsense(v) => v.encode(previous),
        FieldView::Power(v) => v.encode(previous),
        FieldView::Status(v) => v.encode(previous),
        FieldView::Cbalh(v) => v.encode(previous),
        FieldView::Cball(v) => v.encode(previous),
        FieldView::Setsc(v) => v.encode(previous),
    }
}

/// Enable and interrupt-enable of one comparator, as configured by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct ComparatorSetting {
    pub enable: bool,
    pub interrupt_enable: bool,
}

impl ComparatorSetting {
    pub const OFF: ComparatorSetting = ComparatorSetting {
        enable: false,
        interrupt_enable: false,
    };

    pub const ARMED: ComparatorSetting = ComparatorSetting {
        enable: true,
        interrupt_enable: false,
    };

    pub const INTERRUPT: ComparatorSetting = ComparatorSetting {
        enable: true,
        interrupt_enable: true,
    };
}

impl From<ProtectionLatch> for ComparatorSetting {
    fn from(latch: ProtectionLatch) -> Self {
        Self {
            enable: latch.enable,
            interrupt_enable: latch.interrupt_enable,
        }
    }
}

/// Full host-side configuration of the device.
///
/// After reset and after every power-down exit the device is back at
/// `DeviceConfig::default()` and the whole record has to be applied again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct DeviceConfig {
    pub vmon: VmonSelect,
    pub imon: ImonConfig,
    pub fets: FetControl,
    pub short_threshold: ShortThreshold,
    pub balance: BalanceMask,
    pub short_current: ComparatorSetting,
    pub load_open: ComparatorSetting,
    pub charger_open_low: ComparatorSetting,
    pub charger_open_high: ComparatorSetting,
}

impl DeviceConfig {
    pub fn comparator(&self, kind: LatchKind) -> ComparatorSetting {
        match kind {
            LatchKind::ShortCurrent => self.short_current,
            LatchKind::LoadOpen => self.load_open,
            LatchKind::ChargerOpenLow => self.charger_open_low,
            LatchKind::ChargerOpenHigh => self.charger_open_high,
        }
    }

    pub fn comparator_mut(&mut self, kind: LatchKind) -> &mut ComparatorSetting {
        match kind {
            LatchKind::ShortCurrent => &mut self.short_current,
            LatchKind::LoadOpen => &mut self.load_open,
            LatchKind::ChargerOpenLow => &mut self.charger_open_low,
            LatchKind::ChargerOpenHigh => &mut self.charger_open_high,
        }
    }
}
