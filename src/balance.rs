//! Cell balancing switch constraints.
//!
//! Two side-by-side balancing switches must never be on at the same time, the
//! internal switch may be destroyed. The device does not reject such a
//! setting, so every mask is checked here before it reaches CBALH/CBALL.

#[cfg(feature = "defmt")]
use defmt::Format;

use crate::registers::NUM_BALANCE_SWITCHES;

/// Two neighbouring switches requested on at once. Switch numbers are 1-based
/// (SW1..SW16), `lower + 1 == upper`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct AdjacencyViolation {
    pub lower: u8,
    pub upper: u8,
}

/// Checks a full 16-bit switch mask (bit 0 = SW1).
pub fn validate(mask: u16) -> Result<(), AdjacencyViolation> {
    let pairs = mask & (mask >> 1);
    if pairs == 0 {
        return Ok(());
    }
    let lower = pairs.trailing_zeros() as u8 + 1;
    Err(AdjacencyViolation {
        lower,
        upper: lower + 1,
    })
}

/// Whether changing a single switch in an otherwise valid `mask` would break
/// the adjacency rule. `switch` is a 0-based bit position; positions outside
/// the register pair never violate.
pub fn would_violate(mask: u16, switch: u8, on: bool) -> bool {
    if !on || switch as usize >= NUM_BALANCE_SWITCHES {
        return false;
    }
    let neighbours = (1u32 << switch >> 1) | (1u32 << switch << 1);
    (mask as u32) & neighbours != 0
}

/// Like `would_violate`, but names the offending pair.
pub fn check_toggle(mask: u16, switch: u8, on: bool) -> Result<(), AdjacencyViolation> {
    if !would_violate(mask, switch, on) {
        return Ok(());
    }
    let number = switch + 1;
    if switch > 0 && mask & (1 << (switch - 1)) != 0 {
        Err(AdjacencyViolation {
            lower: number - 1,
            upper: number,
        })
    } else {
        Err(AdjacencyViolation {
            lower: number,
            upper: number + 1,
        })
    }
}

/// A validated balance mask, CBALH:CBALL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct BalanceMask(u16);

impl BalanceMask {
    pub const NONE: BalanceMask = BalanceMask(0);

    pub fn new(mask: u16) -> Result<Self, AdjacencyViolation> {
        validate(mask)?;
        Ok(Self(mask))
    }

    /// Joins the register pair as read from the device. The device does not
    /// enforce adjacency, so the result may be an invalid mask.
    pub fn from_registers(cbalh: u8, cball: u8) -> u16 {
        ((cbalh as u16) << 8) | cball as u16
    }

    pub fn bits(&self) -> u16 {
        self.0
    }

    pub fn high(&self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn low(&self) -> u8 {
        self.0 as u8
    }

    /// Switch state, 1-based.
    pub fn is_on(&self, switch: u8) -> bool {
        (1..=NUM_BALANCE_SWITCHES as u8).contains(&switch) && self.0 & (1 << (switch - 1)) != 0
    }

    /// The switches that are on, 1-based, ascending. At most eight can be on
    /// in a valid mask.
    pub fn switches(&self) -> heapless::Vec<u8, 8> {
        let mut on = heapless::Vec::new();
        for switch in 1..=NUM_BALANCE_SWITCHES as u8 {
            if self.is_on(switch) {
                // cannot overflow: a valid mask holds at most 8 switches
                let _ = on.push(switch);
            }
        }
        on
    }
}
