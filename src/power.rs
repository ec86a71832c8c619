//! Normal / power save / power down.
//!
//! Power save keeps the FET drivers and short current detection running but
//! stops both PSENSE and RSENSE comparators; they stay stopped after returning
//! to normal until the host enables them again. Power down switches off VREG
//! (the host's own supply) and is left only by the device itself, on charger
//! connection or a low /PUPIN, with every register back at its reset value.

#[cfg(feature = "defmt")]
use defmt::Format;

use crate::data_types::{FetControl, PowerControl, PsenseConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum PowerState {
    #[default]
    Normal,
    PowerSave,
    PowerDown,
}

/// What stands in the way of a power-down request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct PowerDownBlockers {
    pub charge_fet_on: bool,
    pub discharge_fet_on: bool,
    /// Neither PSENSE comparator reports the charger as disconnected.
    pub charger_connected: bool,
}

impl PowerDownBlockers {
    pub fn is_clear(&self) -> bool {
        !self.charge_fet_on && !self.discharge_fet_on && !self.charger_connected
    }
}

/// Power-down requires both FETs off and a confirmed charger disconnect.
pub fn check_power_down(fets: &FetControl, psense: &PsenseConfig) -> Result<(), PowerDownBlockers> {
    let blockers = PowerDownBlockers {
        charge_fet_on: fets.charge,
        discharge_fet_on: fets.discharge,
        charger_connected: !psense.charger_disconnected(),
    };
    if blockers.is_clear() {
        Ok(())
    } else {
        Err(blockers)
    }
}

/// Confirmed result of a power state request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum PowerOutcome {
    /// The device is in the requested state.
    Entered(PowerState),
    /// Back in normal from power save. The PSENSE and RSENSE comparators are
    /// still stopped; call `rearm_comparators` to restart them.
    ResumedRearmRequired,
    /// PDWN is set but /PUPIN is low, so the device holds off. Request
    /// power-down again to poll.
    Pending,
}

/// Host-side model of the device power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct PowerStateMachine {
    state: PowerState,
    power_down_pending: bool,
    rearm_required: bool,
}

impl PowerStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PowerState {
        self.state
    }

    pub fn power_down_pending(&self) -> bool {
        self.power_down_pending
    }

    /// Comparators were stopped by power save and have not been restarted.
    pub fn rearm_required(&self) -> bool {
        self.rearm_required
    }

    /// POWER register contents that request `target`.
    pub fn request(&self, target: PowerState, current: PowerControl) -> PowerControl {
        match target {
            PowerState::Normal => PowerControl {
                power_save: false,
                power_down: false,
                ..current
            },
            PowerState::PowerSave => PowerControl {
                power_save: true,
                power_down: false,
                ..current
            },
            PowerState::PowerDown => PowerControl {
                power_down: true,
                ..current
            },
        }
    }

    /// Records the POWER read-back after a request for `target`.
    pub fn confirm(&mut self, target: PowerState, confirmed: PowerControl) -> PowerOutcome {
        let previous = self.state;
        let outcome = match target {
            PowerState::PowerDown if confirmed.wake_inhibit => {
                self.power_down_pending = true;
                PowerOutcome::Pending
            }
            PowerState::PowerDown => {
                self.state = PowerState::PowerDown;
                self.power_down_pending = false;
                PowerOutcome::Entered(PowerState::PowerDown)
            }
            _ => {
                self.power_down_pending = false;
                self.observe(confirmed);
                if previous == PowerState::PowerSave && self.state == PowerState::Normal {
                    self.rearm_required = true;
                    PowerOutcome::ResumedRearmRequired
                } else {
                    PowerOutcome::Entered(self.state)
                }
            }
        };
        #[cfg(feature = "defmt")]
        defmt::info!("power {} -> {}: {}", previous, target, outcome);
        outcome
    }

    /// Tracks PSV from any POWER or STATUS read-back.
    pub fn observe(&mut self, power: PowerControl) {
        if self.state == PowerState::PowerDown {
            return;
        }
        self.state = if power.power_save {
            PowerState::PowerSave
        } else {
            PowerState::Normal
        };
    }

    pub fn comparators_rearmed(&mut self) {
        self.rearm_required = false;
    }

    /// The device left power down on its own; it is in normal with reset
    /// registers.
    pub fn power_down_exited(&mut self) {
        *self = Self::new();
    }
}
