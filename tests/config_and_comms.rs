#![cfg(not(feature = "async"))]

mod common;

use common::*;
use ml5238_async_rs::{
    registers::Register, BalanceMask, ComparatorSetting, DeviceConfig, Error, FetControl,
    GainCalibration, ImonConfig, ImonGain, LatchKind, LatchState, Ml5238, PowerState,
    ShortThreshold, VmonSelect,
};

fn full_config() -> DeviceConfig {
    DeviceConfig {
        vmon: VmonSelect {
            enabled: true,
            cell: 7,
        },
        imon: ImonConfig {
            output: true,
            gain: ImonGain::X50,
            zero: false,
            calibration: GainCalibration::ReferenceInput,
        },
        fets: FetControl {
            charge: true,
            discharge: true,
            boost: false,
        },
        short_threshold: ShortThreshold::Threshold200mV,
        balance: BalanceMask::new(0x0505).unwrap(),
        short_current: ComparatorSetting::INTERRUPT,
        load_open: ComparatorSetting::ARMED,
        charger_open_low: ComparatorSetting::OFF,
        charger_open_high: ComparatorSetting::INTERRUPT,
    }
}

#[test]
fn communication_check() {
    let sim = SimulatedMl5238::new();
    let mut afe = Ml5238::new(sim.clone());

    assert_eq!(afe.check_communication(0xA5), Ok(()));
    assert_eq!(
        sim.events(),
        vec![
            Event::Write(Register::Noop, 0xA5),
            Event::Read(Register::Noop, 0xA5)
        ]
    );

    sim.corrupt_noop(0x01);
    assert_eq!(
        afe.check_communication(0x5A),
        Err(Error::CommunicationCheck {
            expected: 0x5A,
            actual: 0x5B
        })
    );
}

#[test]
fn scratch_register_round_trip() {
    let sim = SimulatedMl5238::new();
    let mut afe = Ml5238::new(sim.clone());
    assert_eq!(afe.write_scratch(0x3C), Ok(0x3C));
    assert_eq!(afe.shadow(Register::Noop), 0x3C);
}

#[test]
fn apply_config_writes_fets_last() {
    let sim = SimulatedMl5238::new();
    let mut delay = sim.delay();
    let mut afe = Ml5238::new(sim.clone());
    let config = full_config();

    let applied = afe.apply_config(&config, &mut delay).unwrap();
    assert_eq!(applied, config);
    assert_eq!(afe.config(), &config);
    assert_eq!(afe.read_config(), Ok(config));

    let writes = sim.writes();
    assert_eq!(writes.last(), Some(&(Register::Fet, 0b0000_0011)));
    let events = sim.events();
    let wait = position(&events, |e| matches!(e, Event::DelayNs(_)));
    let first_interrupt = position(&events, |e| {
        matches!(e, Event::Write(Register::Rsense, v) if v & 0b0100_0000 != 0)
    });
    assert!(wait < first_interrupt);

    assert_eq!(afe.latch_state(LatchKind::ShortCurrent), LatchState::Armed);
    assert_eq!(afe.latch_state(LatchKind::ChargerOpenLow), LatchState::Disabled);
    assert_eq!(sim.peek(Register::Imon), 0b0001_0101);
    assert_eq!(sim.peek(Register::Setsc), 0b01);
}

#[test]
fn apply_config_rejects_bad_cell_before_writing() {
    let sim = SimulatedMl5238::new();
    let mut delay = sim.delay();
    let mut afe = Ml5238::new(sim.clone());
    let mut config = full_config();
    config.vmon.cell = 16;

    assert_eq!(
        afe.apply_config(&config, &mut delay),
        Err(Error::InvalidCell(16))
    );
    assert!(sim.events().is_empty());
}

#[test]
fn vmon_selection() {
    let sim = SimulatedMl5238::new();
    let mut afe = Ml5238::new(sim.clone());

    let vmon = afe.select_vmon_cell(15, true).unwrap();
    assert_eq!(vmon.output_cell(), Some(15));
    assert_eq!(sim.peek(Register::Vmon), 0b0001_1111);

    let vmon = afe.select_vmon_cell(15, false).unwrap();
    assert_eq!(vmon.output_cell(), None);

    sim.clear_log();
    assert_eq!(afe.select_vmon_cell(16, true), Err(Error::InvalidCell(16)));
    assert!(sim.events().is_empty());
}

#[test]
fn imon_zero_overrides_calibration() {
    let sim = SimulatedMl5238::new();
    let mut afe = Ml5238::new(sim.clone());

    let imon = afe
        .configure_imon(ImonConfig {
            output: true,
            gain: ImonGain::X10,
            zero: true,
            calibration: GainCalibration::ReferenceOutput,
        })
        .unwrap();
    assert!(imon.zero);
    assert_eq!(imon.calibration, GainCalibration::ReferenceOutput);
    assert_eq!(imon.effective_calibration(), None);
    assert_eq!(afe.shadow(Register::Imon), 0b0001_1010);
}

#[test]
fn short_threshold_levels() {
    let sim = SimulatedMl5238::new();
    let mut afe = Ml5238::new(sim.clone());

    for level in ShortThreshold::ALL {
        assert_eq!(afe.set_short_threshold(level), Ok(level));
        assert_eq!(sim.peek(Register::Setsc), level as u8);
    }
    assert_eq!(afe.config().short_threshold, ShortThreshold::Threshold400mV);
}

#[test]
fn boosted_fet_switching_drops_drv() {
    let sim = SimulatedMl5238::new();
    let mut delay = sim.delay();
    let mut afe = Ml5238::new(sim.clone());

    let fets = afe.switch_fets_boosted(true, true, 50, &mut delay).unwrap();
    assert_eq!(
        fets,
        FetControl {
            charge: true,
            discharge: true,
            boost: false
        }
    );
    assert_eq!(
        sim.writes(),
        vec![(Register::Fet, 0b0001_0011), (Register::Fet, 0b0000_0011)]
    );
    assert!(sim.events().contains(&Event::DelayNs(50_000)));
}

/// Delay during which the bus goes down.
struct BusDropDelay(SimulatedMl5238);

impl embedded_hal::delay::DelayNs for BusDropDelay {
    fn delay_ns(&mut self, _ns: u32) {
        self.0.set_failing(true);
    }
}

#[test]
fn boosted_switching_failure_leaves_drv_set() {
    let sim = SimulatedMl5238::new();
    let mut afe = Ml5238::new(sim.clone());

    assert_eq!(
        afe.switch_fets_boosted(true, false, 50, &mut BusDropDelay(sim.clone())),
        Err(Error::Transport(BusError))
    );
    assert_eq!(sim.peek(Register::Fet), 0b0001_0010);

    sim.set_failing(false);
    // set_fets keeps DRV, a second boosted switch drops it
    assert!(afe.set_fets(true, false).unwrap().boost);
    let fets = afe
        .switch_fets_boosted(true, false, 50, &mut sim.delay())
        .unwrap();
    assert!(!fets.boost);
    assert_eq!(sim.peek(Register::Fet), 0b0000_0010);
}

#[test]
fn sync_reads_every_register() {
    let sim = SimulatedMl5238::new();
    sim.poke(Register::Vmon, 0x19);
    sim.poke(Register::Fet, 0x02);
    sim.poke(Register::Rsense, 0x80);
    sim.poke(Register::Power, 0x01);
    let mut afe = Ml5238::new(sim.clone());

    afe.sync().unwrap();
    for reg in Register::ALL {
        assert_eq!(afe.shadow(reg), sim.peek(reg), "{reg:?}");
    }
    assert_eq!(afe.power_state(), PowerState::PowerSave);
    assert_eq!(afe.latch_state(LatchKind::ShortCurrent), LatchState::Armed);
    assert_eq!(afe.latch_state(LatchKind::LoadOpen), LatchState::Disabled);
}

#[test]
fn read_only_bits_are_written_back_as_read() {
    let sim = SimulatedMl5238::new();
    let mut afe = Ml5238::new(sim.clone());
    sim.set_pupin(true);

    afe.set_power_state(PowerState::PowerSave).unwrap();
    // PUPIN is carried over from the read, the device ignores it
    assert_eq!(sim.writes(), vec![(Register::Power, 0b1000_0001)]);
    assert!(afe.read_status_snapshot().unwrap().power_save);
}
