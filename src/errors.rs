#[cfg(feature = "defmt")]
use defmt::Format;

use crate::balance::AdjacencyViolation;
use crate::power::PowerDownBlockers;

/// Represents potential errors when driving the ML5238.
///
/// Every variant except `Transport` is raised before any register is written,
/// so the device is left untouched.
#[derive(Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum Error<E> {
    /// The register transport failed. Surfaced unchanged, never retried.
    Transport(E),
    /// The requested balance mask turns on two neighbouring switches.
    AdjacentSwitches(AdjacencyViolation),
    /// Power-down was requested while FETs are on or the charger is still
    /// connected.
    PreconditionNotMet(PowerDownBlockers),
    /// Cell index outside V1..V16 (0..=15).
    InvalidCell(u8),
    /// Balance switch number outside SW1..SW16.
    InvalidSwitch(u8),
    /// The device is in power-down; nothing can be written until it wakes.
    PoweredDown,
    /// The device is in power save, which holds the comparators stopped.
    PowerSaveActive,
    /// NOOP scratch register did not read back what was written.
    CommunicationCheck {
        /// The value written to NOOP.
        expected: u8,
        /// The value read back.
        actual: u8,
    },
}
