#![no_std]

#[macro_use]
extern crate uom;

#[cfg(feature = "defmt")]
extern crate defmt;

#[cfg(not(feature = "async"))]
use embedded_hal::delay::DelayNs;
#[cfg(feature = "async")]
use embedded_hal_async::delay::DelayNs;

pub mod balance;
pub mod data_types;
pub mod errors;
pub mod power;
pub mod protection;
pub mod registers;
pub mod shared;
pub mod spi;
pub mod units;

use registers::*;

pub use balance::{AdjacencyViolation, BalanceMask};
pub use data_types::{
    short_circuit_delay, ComparatorSetting, DeviceConfig, FetControl, GainCalibration,
    ImonConfig, ImonGain, PowerControl, PsenseConfig, RegisterView, RsenseConfig, ShortThreshold,
    StatusSnapshot, VmonSelect,
};
pub use errors::Error;
pub use power::{PowerDownBlockers, PowerOutcome, PowerState};
pub use protection::{LatchKind, LatchState, LatchTransition, ProtectionLatch, ProtectionPoll};
pub use shared::SharedMl5238;
pub use spi::SpiInterface;

use data_types::Scratch;
use power::PowerStateMachine;
use protection::{latch_write_value, ProtectionMonitor, COMPARATOR_WARMUP_MS};

/// Comparators stopped by power save. Short current detection keeps running.
const POWER_SAVE_STOPPED: [LatchKind; 3] = [
    LatchKind::LoadOpen,
    LatchKind::ChargerOpenLow,
    LatchKind::ChargerOpenHigh,
];

#[maybe_async_cfg::maybe(
    sync(cfg(not(feature = "async")), self = "RegisterAccess",),
    async(feature = "async", keep_self)
)]
#[allow(async_fn_in_trait)]
/// Byte-wide access to the ML5238 control registers.
///
/// Implementations own the bus framing and any timeout. The driver never
/// retries; an error is handed back to the caller unchanged.
pub trait RegisterAccess {
    type Error;

    /// Reads a single register.
    async fn read_register(&mut self, reg: Register) -> Result<u8, Self::Error>;

    /// Writes a single register.
    async fn write_register(&mut self, reg: Register, value: u8) -> Result<(), Self::Error>;
}

/// ML5238 driver
///
/// Every mutating operation validates its arguments, performs a
/// read-modify-write and then reads back the registers it touched, plus any
/// register the device changes on its own as a consequence. The returned
/// value is always the confirmed device state, which can differ from the
/// request: latch bits ignore writes of 1, status bits ignore all writes and
/// the device clears the FET bits on a short current.
pub struct Ml5238<T> {
    transport: T,
    /// Last successfully read value of every register.
    shadow: [u8; REGISTER_COUNT],
    power: PowerStateMachine,
    protection: ProtectionMonitor,
    /// Configuration the host has asked for.
    config: DeviceConfig,
    reconfigure_required: bool,
}

impl<T> Ml5238<T> {
    /// Creates a driver for a device fresh out of reset.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            shadow: [RESET_VALUE; REGISTER_COUNT],
            power: PowerStateMachine::new(),
            protection: ProtectionMonitor::new(),
            config: DeviceConfig::default(),
            reconfigure_required: false,
        }
    }

    /// Gives the transport back.
    pub fn release(self) -> T {
        self.transport
    }

    /// Last value read from `reg`. Never updated by a failed transfer.
    pub fn shadow(&self, reg: Register) -> u8 {
        self.shadow[reg.index()]
    }

    pub fn power_state(&self) -> PowerState {
        self.power.state()
    }

    pub fn latch_state(&self, kind: LatchKind) -> LatchState {
        self.protection.state(kind)
    }

    /// The configuration the host asked for, to be reapplied after reset.
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Power save stopped the PSENSE/RSENSE comparators;
    /// `rearm_comparators` has to run before they report anything again.
    pub fn comparators_need_rearm(&self) -> bool {
        self.power.rearm_required()
    }

    /// A power-down request is waiting on /PUPIN.
    pub fn power_down_pending(&self) -> bool {
        self.power.power_down_pending()
    }

    /// Registers were reset by a power-down exit and nothing has been
    /// applied since.
    pub fn reconfigure_required(&self) -> bool {
        self.reconfigure_required
    }

    /// The device left power down on its own (charger connected or /PUPIN
    /// pulled low) and the host is running again.
    ///
    /// Every register is back at its reset value. The previous configuration
    /// is kept in `config()` but is not written back: call `apply_config`.
    pub fn on_power_down_exit(&mut self) {
        #[cfg(feature = "defmt")]
        defmt::info!("power down exit, registers reset");
        self.shadow = [RESET_VALUE; REGISTER_COUNT];
        self.power.power_down_exited();
        self.protection.reset();
        self.reconfigure_required = true;
    }

    /// Charger connection reported by the board. While powered down the
    /// device wakes on it.
    pub fn on_charger_connected(&mut self) {
        if self.power.state() == PowerState::PowerDown {
            self.on_power_down_exit();
        }
    }
}

#[maybe_async_cfg::maybe(
    sync(cfg(not(feature = "async")), self = "Ml5238",),
    async(feature = "async", keep_self)
)]
impl<T> Ml5238<T>
where
    T: RegisterAccess,
{
    fn ensure_awake(&self) -> Result<(), Error<T::Error>> {
        if self.power.state() == PowerState::PowerDown {
            #[cfg(feature = "defmt")]
            defmt::warn!("device is powered down");
            return Err(Error::PoweredDown);
        }
        Ok(())
    }

    async fn read(&mut self, reg: Register) -> Result<u8, Error<T::Error>> {
        let value = self
            .transport
            .read_register(reg)
            .await
            .map_err(Error::Transport)?;
        self.shadow[reg.index()] = value;
        Ok(value)
    }

    async fn write(&mut self, reg: Register, value: u8) -> Result<(), Error<T::Error>> {
        #[cfg(feature = "defmt")]
        defmt::trace!("write {} = {:#x}", reg, value);
        self.transport
            .write_register(reg, value)
            .await
            .map_err(Error::Transport)
    }

    async fn read_view<V: RegisterView>(&mut self) -> Result<V, Error<T::Error>> {
        let raw = self.read(V::REGISTER).await?;
        Ok(V::decode(raw))
    }

    /// Read-modify-write of a register without latch bits, returning the
    /// confirmed view.
    async fn modify<V: RegisterView>(
        &mut self,
        edit: impl FnOnce(&mut V),
    ) -> Result<V, Error<T::Error>> {
        let previous = self.read(V::REGISTER).await?;
        let mut view = V::decode(previous);
        edit(&mut view);
        self.write(V::REGISTER, view.encode(previous)).await?;
        self.read_view::<V>().await
    }

    /// Read-modify-write of PSENSE or RSENSE.
    ///
    /// `edit` gets the raw read-back and returns the wanted image. Latches in
    /// `clear` are written as 0, all other latches as 1.
    async fn update_protection(
        &mut self,
        reg: Register,
        clear: u8,
        edit: impl FnOnce(u8) -> u8,
    ) -> Result<(u8, ProtectionPoll), Error<T::Error>> {
        let previous = self.read(reg).await?;
        let keep = reg.read_only_mask();
        let encoded = (previous & keep) | (edit(previous) & !keep);
        self.write(reg, latch_write_value(reg, encoded, clear))
            .await?;
        let confirmed = self.read(reg).await?;
        let poll = self.observe_protection(reg, confirmed).await?;
        Ok((confirmed, poll))
    }

    async fn update_latch(
        &mut self,
        kind: LatchKind,
        clear: bool,
        edit: impl FnOnce(&mut ProtectionLatch),
    ) -> Result<ProtectionLatch, Error<T::Error>> {
        let clear = if clear { kind.latch_mask() } else { 0 };
        let (confirmed, _) = self
            .update_protection(kind.register(), clear, |raw| {
                let mut latch = ProtectionLatch::from_register(kind, raw);
                edit(&mut latch);
                latch.merge_into(kind, raw)
            })
            .await?;
        Ok(ProtectionLatch::from_register(kind, confirmed))
    }

    /// Feeds a PSENSE/RSENSE read-back to the latch state machine and reads
    /// every register the resulting transitions fanned out into. The monitor
    /// only advances once all of those reads succeeded.
    async fn observe_protection(
        &mut self,
        reg: Register,
        raw: u8,
    ) -> Result<ProtectionPoll, Error<T::Error>> {
        let mut monitor = self.protection;
        let transitions = monitor.observe_register(reg, raw);

        let mut poll = ProtectionPoll::default();
        for transition in transitions {
            for dependent in transition.fan_out() {
                let value = self.read(*dependent).await?;
                if *dependent == Register::Fet {
                    let fets = FetControl::decode(value);
                    #[cfg(feature = "defmt")]
                    defmt::warn!(
                        "{} latched, FETs now charge={} discharge={}",
                        transition.kind,
                        fets.charge,
                        fets.discharge
                    );
                    // never turn the FETs back on behind the host's back
                    self.config.fets.charge &= fets.charge;
                    self.config.fets.discharge &= fets.discharge;
                    poll.fets = Some(fets);
                }
            }
            // at most four latches exist
            let _ = poll.transitions.push(transition);
        }

        self.protection = monitor;
        Ok(poll)
    }

    /// Sets run enables of `kinds` from the host configuration with the
    /// interrupts off, waits for the comparators to settle, then sets the
    /// interrupt enables.
    async fn start_comparators<D: DelayNs>(
        &mut self,
        kinds: &[LatchKind],
        delay: &mut D,
    ) -> Result<(), Error<T::Error>> {
        let config = self.config;

        for reg in [Register::Rsense, Register::Psense] {
            self.update_protection(reg, 0, |mut raw| {
                for kind in kinds.iter().filter(|k| k.register() == reg) {
                    let mut latch = ProtectionLatch::from_register(*kind, raw);
                    latch.enable = config.comparator(*kind).enable;
                    latch.interrupt_enable = false;
                    raw = latch.merge_into(*kind, raw);
                }
                raw
            })
            .await?;
        }

        let wants_interrupt = kinds.iter().any(|k| {
            let setting = config.comparator(*k);
            setting.enable && setting.interrupt_enable
        });
        if !wants_interrupt {
            return Ok(());
        }
        delay.delay_ms(COMPARATOR_WARMUP_MS).await;

        for reg in [Register::Rsense, Register::Psense] {
            self.update_protection(reg, 0, |mut raw| {
                for kind in kinds.iter().filter(|k| k.register() == reg) {
                    let mut latch = ProtectionLatch::from_register(*kind, raw);
                    latch.interrupt_enable = config.comparator(*kind).interrupt_enable;
                    raw = latch.merge_into(*kind, raw);
                }
                raw
            })
            .await?;
        }
        Ok(())
    }

    /// Reads every control register into the shadow table and resyncs the
    /// power and latch models.
    pub async fn sync(&mut self) -> Result<(), Error<T::Error>> {
        for reg in Register::ALL {
            self.read(reg).await?;
        }
        let power = PowerControl::decode(self.shadow(Register::Power));
        self.power.observe(power);
        let mut monitor = self.protection;
        for reg in [Register::Rsense, Register::Psense] {
            monitor.observe_register(reg, self.shadow(reg));
        }
        self.protection = monitor;
        Ok(())
    }

    /// Writes `pattern` to the NOOP scratch register and expects it back.
    pub async fn check_communication(&mut self, pattern: u8) -> Result<(), Error<T::Error>> {
        self.ensure_awake()?;
        self.write(Register::Noop, pattern).await?;
        let actual = self.read(Register::Noop).await?;
        if actual != pattern {
            #[cfg(feature = "defmt")]
            defmt::error!("NOOP read back {:#x}, wrote {:#x}", actual, pattern);
            return Err(Error::CommunicationCheck {
                expected: pattern,
                actual,
            });
        }
        Ok(())
    }

    /// Routes cell `cell` (0 = V1 .. 15 = V16) to the VMON pin, or grounds the
    /// pin when `enabled` is false.
    pub async fn select_vmon_cell(
        &mut self,
        cell: u8,
        enabled: bool,
    ) -> Result<VmonSelect, Error<T::Error>> {
        if cell as usize >= NUM_CELLS {
            return Err(Error::InvalidCell(cell));
        }
        self.ensure_awake()?;
        let confirmed = self
            .modify(|vmon: &mut VmonSelect| {
                vmon.cell = cell;
                vmon.enabled = enabled;
            })
            .await?;
        self.config.vmon = VmonSelect { cell, enabled };
        Ok(confirmed)
    }

    pub async fn configure_imon(
        &mut self,
        config: ImonConfig,
    ) -> Result<ImonConfig, Error<T::Error>> {
        self.ensure_awake()?;
        let confirmed = self.modify(|imon: &mut ImonConfig| *imon = config).await?;
        self.config.imon = config;
        Ok(confirmed)
    }

    /// Turns the charge and discharge FETs on or off. DRV is left alone.
    pub async fn set_fets(
        &mut self,
        charge: bool,
        discharge: bool,
    ) -> Result<FetControl, Error<T::Error>> {
        self.ensure_awake()?;
        let confirmed = self
            .modify(|fet: &mut FetControl| {
                fet.charge = charge;
                fet.discharge = discharge;
            })
            .await?;
        self.config.fets.charge = charge;
        self.config.fets.discharge = discharge;
        Ok(confirmed)
    }

    /// Switches the FETs with the gate driver boosted, waits `rise_time_us`
    /// for the gates to charge, then drops DRV again. Leaving DRV set raises
    /// consumption and the gate high level.
    ///
    /// If the second write fails DRV stays set on the device and the error is
    /// returned as is. `set_fets` keeps DRV; call this again or `apply_config`
    /// to drop it.
    pub async fn switch_fets_boosted<D: DelayNs>(
        &mut self,
        charge: bool,
        discharge: bool,
        rise_time_us: u32,
        delay: &mut D,
    ) -> Result<FetControl, Error<T::Error>> {
        self.ensure_awake()?;
        self.modify(|fet: &mut FetControl| {
            fet.charge = charge;
            fet.discharge = discharge;
            fet.boost = true;
        })
        .await?;
        self.config.fets.charge = charge;
        self.config.fets.discharge = discharge;
        delay.delay_us(rise_time_us).await;
        self.modify(|fet: &mut FetControl| fet.boost = false).await
    }

    pub async fn set_short_threshold(
        &mut self,
        level: ShortThreshold,
    ) -> Result<ShortThreshold, Error<T::Error>> {
        self.ensure_awake()?;
        let confirmed = self
            .modify(|threshold: &mut ShortThreshold| *threshold = level)
            .await?;
        self.config.short_threshold = level;
        Ok(confirmed)
    }

    /// Reads CBALH:CBALL as stored on the device.
    pub async fn read_balance(&mut self) -> Result<u16, Error<T::Error>> {
        let high = self.read(Register::Cbalh).await?;
        let low = self.read(Register::Cball).await?;
        Ok(BalanceMask::from_registers(high, low))
    }

    async fn write_balance(&mut self, from: u16, to: u16) -> Result<(), Error<T::Error>> {
        let (from, to) = (from.to_be_bytes(), to.to_be_bytes());
        if from[0] != to[0] {
            self.write(Register::Cbalh, to[0]).await?;
        }
        if from[1] != to[1] {
            self.write(Register::Cball, to[1]).await?;
        }
        Ok(())
    }

    async fn confirmed_balance(&mut self) -> Result<BalanceMask, Error<T::Error>> {
        let confirmed = self.read_balance().await?;
        BalanceMask::new(confirmed).map_err(Error::AdjacentSwitches)
    }

    /// Replaces the whole balance mask (bit 0 = SW1).
    ///
    /// The mask is rejected before anything is written if two neighbouring
    /// switches would be on. CBALH and CBALL are written separately, so the
    /// driver first turns off the switches that go away and only then turns on
    /// the new ones; no intermediate state ever joins switches across the
    /// SW8/SW9 boundary.
    pub async fn set_cell_balance(&mut self, mask: u16) -> Result<BalanceMask, Error<T::Error>> {
        let target = BalanceMask::new(mask).map_err(|violation| {
            #[cfg(feature = "defmt")]
            defmt::warn!("balance mask {:#x} rejected: {}", mask, violation);
            Error::AdjacentSwitches(violation)
        })?;
        self.ensure_awake()?;

        let current = self.read_balance().await?;
        let keep = current & target.bits();
        self.write_balance(current, keep).await?;
        self.write_balance(keep, target.bits()).await?;

        self.config.balance = target;
        self.confirmed_balance().await
    }

    /// Turns a single switch (1 = SW1 .. 16 = SW16) on or off.
    pub async fn toggle_balance_switch(
        &mut self,
        switch: u8,
        on: bool,
    ) -> Result<BalanceMask, Error<T::Error>> {
        if !(1..=NUM_BALANCE_SWITCHES as u8).contains(&switch) {
            return Err(Error::InvalidSwitch(switch));
        }
        self.ensure_awake()?;

        let current = self.read_balance().await?;
        let position = switch - 1;
        balance::check_toggle(current, position, on).map_err(Error::AdjacentSwitches)?;

        let bit = 1u16 << position;
        let next = if on { current | bit } else { current & !bit };
        // the device may already hold a bad mask; set_cell_balance clears it
        let mask = BalanceMask::new(next).map_err(Error::AdjacentSwitches)?;
        self.write_balance(current, next).await?;

        self.config.balance = mask;
        self.confirmed_balance().await
    }

    /// Starts a comparator (Disabled -> Armed). The interrupt enable is left
    /// as it is.
    pub async fn arm_protection(
        &mut self,
        kind: LatchKind,
    ) -> Result<ProtectionLatch, Error<T::Error>> {
        self.ensure_awake()?;
        self.config.comparator_mut(kind).enable = true;
        self.update_latch(kind, false, |latch| latch.enable = true)
            .await
    }

    /// Stops a comparator. Its output and latch read 0 from then on.
    pub async fn disarm_protection(
        &mut self,
        kind: LatchKind,
    ) -> Result<ProtectionLatch, Error<T::Error>> {
        self.ensure_awake()?;
        *self.config.comparator_mut(kind) = ComparatorSetting::OFF;
        self.update_latch(kind, false, |latch| {
            latch.enable = false;
            latch.interrupt_enable = false;
        })
        .await
    }

    /// Sets the interrupt enable of an armed comparator.
    ///
    /// The comparator must have been running for more than 1 ms, otherwise its
    /// start-up can raise a spurious interrupt. The device does not check;
    /// `arm_protection_with_interrupt` does the wait.
    pub async fn enable_protection_interrupt(
        &mut self,
        kind: LatchKind,
    ) -> Result<ProtectionLatch, Error<T::Error>> {
        self.ensure_awake()?;
        #[cfg(feature = "defmt")]
        if self.protection.state(kind) == LatchState::Disabled {
            defmt::warn!("{} interrupt enabled while the comparator is stopped", kind);
        }
        self.config.comparator_mut(kind).interrupt_enable = true;
        self.update_latch(kind, false, |latch| latch.interrupt_enable = true)
            .await
    }

    /// Arms a comparator, waits out its warm-up and enables its interrupt.
    pub async fn arm_protection_with_interrupt<D: DelayNs>(
        &mut self,
        kind: LatchKind,
        delay: &mut D,
    ) -> Result<ProtectionLatch, Error<T::Error>> {
        self.ensure_awake()?;
        *self.config.comparator_mut(kind) = ComparatorSetting::INTERRUPT;
        self.update_latch(kind, false, |latch| {
            latch.enable = true;
            latch.interrupt_enable = false;
        })
        .await?;
        delay.delay_ms(COMPARATOR_WARMUP_MS).await;
        self.update_latch(kind, false, |latch| latch.interrupt_enable = true)
            .await
    }

    /// Clears an interrupt latch (Latched -> Armed). Clearing a latch that is
    /// not set changes nothing and is not an error.
    pub async fn clear_latch(
        &mut self,
        kind: LatchKind,
    ) -> Result<ProtectionLatch, Error<T::Error>> {
        self.write_latch_bit(kind, false).await
    }

    /// Writes a latch bit directly. The device ignores a 1; the call still
    /// succeeds and returns the unchanged state, so it must not be retried.
    pub async fn write_latch_bit(
        &mut self,
        kind: LatchKind,
        value: bool,
    ) -> Result<ProtectionLatch, Error<T::Error>> {
        self.ensure_awake()?;
        self.update_latch(kind, !value, |_| {}).await
    }

    /// Reads one comparator without changing it.
    pub async fn read_protection(
        &mut self,
        kind: LatchKind,
    ) -> Result<ProtectionLatch, Error<T::Error>> {
        let raw = self.read(kind.register()).await?;
        self.observe_protection(kind.register(), raw).await?;
        Ok(ProtectionLatch::from_register(kind, raw))
    }

    /// Reads both protection registers and reports latch transitions since the
    /// last observation. A new short current latch also re-reads the FET
    /// register; the FETs are left off for the host to turn back on.
    pub async fn poll_protection(&mut self) -> Result<ProtectionPoll, Error<T::Error>> {
        let mut poll = ProtectionPoll::default();
        for reg in [Register::Rsense, Register::Psense] {
            let raw = self.read(reg).await?;
            let observed = self.observe_protection(reg, raw).await?;
            for transition in observed.transitions {
                let _ = poll.transitions.push(transition);
            }
            poll.fets = poll.fets.or(observed.fets);
        }
        Ok(poll)
    }

    /// Reads the STATUS register.
    ///
    /// A short current latch the driver has not seen yet triggers the FET
    /// re-read, the same as `poll_protection`.
    pub async fn read_status_snapshot(&mut self) -> Result<StatusSnapshot, Error<T::Error>> {
        let status = self.read_view::<StatusSnapshot>().await?;
        self.power.observe(PowerControl {
            power_save: status.power_save,
            ..Default::default()
        });
        if status.short_current
            && self.protection.state(LatchKind::ShortCurrent) != LatchState::Latched
        {
            let raw = self.read(Register::Rsense).await?;
            self.observe_protection(Register::Rsense, raw).await?;
        }
        Ok(status)
    }

    /// Requests a power state change.
    ///
    /// Power-down needs both FETs off and the charger confirmed disconnected
    /// on PSENSE; otherwise nothing is written and `PreconditionNotMet` lists
    /// what is missing. With /PUPIN held low the request is stored but the
    /// device waits, reported as `PowerOutcome::Pending`; call again to poll.
    /// POWER is read back after PDWN is written; only an unanswered read-back
    /// or one with /PUPIN high counts as entered. Once the device is down it
    /// stops answering and VREG drops.
    ///
    /// Leaving power save returns `ResumedRearmRequired`: the PSENSE and
    /// RSENSE comparators stay stopped until `rearm_comparators` is called.
    pub async fn set_power_state(
        &mut self,
        target: PowerState,
    ) -> Result<PowerOutcome, Error<T::Error>> {
        self.ensure_awake()?;
        let previous = self.read(Register::Power).await?;
        let current = PowerControl::decode(previous);

        if target == PowerState::PowerDown {
            let fets = self.read_view::<FetControl>().await?;
            let psense = self.read_view::<PsenseConfig>().await?;
            power::check_power_down(&fets, &psense).map_err(|blockers| {
                #[cfg(feature = "defmt")]
                defmt::warn!("power down refused: {}", blockers);
                Error::PreconditionNotMet(blockers)
            })?;
        }

        let request = self.power.request(target, current);
        self.write(Register::Power, request.encode(previous)).await?;

        let confirmed = if target == PowerState::PowerDown {
            // a device that went down no longer answers; /PUPIN may have
            // been pulled low since the first read, so check again
            self.read_view::<PowerControl>()
                .await
                .unwrap_or(PowerControl {
                    wake_inhibit: false,
                    ..request
                })
        } else {
            self.read_view::<PowerControl>().await?
        };
        Ok(self.power.confirm(target, confirmed))
    }

    /// Restarts the comparators power save stopped (load open and both
    /// charger open comparators) as the host configured them: stop, run,
    /// warm-up, then interrupt enable.
    ///
    /// Refused in power save, where the device keeps them stopped.
    pub async fn rearm_comparators<D: DelayNs>(
        &mut self,
        delay: &mut D,
    ) -> Result<(RsenseConfig, PsenseConfig), Error<T::Error>> {
        self.ensure_awake()?;
        if self.power.state() == PowerState::PowerSave {
            return Err(Error::PowerSaveActive);
        }
        for reg in [Register::Rsense, Register::Psense] {
            self.update_protection(reg, 0, |mut raw| {
                for kind in POWER_SAVE_STOPPED.iter().filter(|k| k.register() == reg) {
                    raw = ProtectionLatch::default().merge_into(*kind, raw);
                }
                raw
            })
            .await?;
        }
        self.start_comparators(&POWER_SAVE_STOPPED, delay).await?;
        self.power.comparators_rearmed();

        let rsense = self.read_view::<RsenseConfig>().await?;
        let psense = self.read_view::<PsenseConfig>().await?;
        Ok((rsense, psense))
    }

    /// Writes a complete configuration: short threshold, current monitor, cell
    /// monitor, balancing, comparators (with warm-up before interrupts) and
    /// finally the FETs, so protection is running before they turn on.
    pub async fn apply_config<D: DelayNs>(
        &mut self,
        config: &DeviceConfig,
        delay: &mut D,
    ) -> Result<DeviceConfig, Error<T::Error>> {
        if config.vmon.cell as usize >= NUM_CELLS {
            return Err(Error::InvalidCell(config.vmon.cell));
        }
        self.ensure_awake()?;

        self.set_short_threshold(config.short_threshold).await?;
        self.configure_imon(config.imon).await?;
        self.select_vmon_cell(config.vmon.cell, config.vmon.enabled)
            .await?;
        self.set_cell_balance(config.balance.bits()).await?;

        self.config = *config;
        self.start_comparators(&LatchKind::ALL, delay).await?;

        self.modify(|fet: &mut FetControl| {
            fet.charge = config.fets.charge;
            fet.discharge = config.fets.discharge;
            fet.boost = false;
        })
        .await?;

        self.reconfigure_required = false;
        #[cfg(feature = "defmt")]
        defmt::info!("configuration applied");
        self.read_config().await
    }

    /// Reads the configuration as stored on the device.
    pub async fn read_config(&mut self) -> Result<DeviceConfig, Error<T::Error>> {
        let vmon = self.read_view::<VmonSelect>().await?;
        let imon = self.read_view::<ImonConfig>().await?;
        let fets = self.read_view::<FetControl>().await?;
        let short_threshold = self.read_view::<ShortThreshold>().await?;
        let rsense = self.read_view::<RsenseConfig>().await?;
        let psense = self.read_view::<PsenseConfig>().await?;
        let balance = self.confirmed_balance().await?;
        Ok(DeviceConfig {
            vmon,
            imon,
            fets,
            short_threshold,
            balance,
            short_current: rsense.short_current.into(),
            load_open: rsense.load_open.into(),
            charger_open_low: psense.low.into(),
            charger_open_high: psense.high.into(),
        })
    }

    /// Stores `value` in the NOOP scratch register.
    pub async fn write_scratch(&mut self, value: u8) -> Result<u8, Error<T::Error>> {
        self.ensure_awake()?;
        let confirmed = self.modify(|scratch: &mut Scratch| scratch.0 = value).await?;
        Ok(confirmed.0)
    }
}
