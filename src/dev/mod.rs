//! Per-chip register layouts.
//!
//! The BCM2835 family (BCM2835/6/7, Pi 1 to 3) and the BCM2711 (Pi 4) share
//! the function select, set, clear and level registers. They differ in how
//! pull resistors are configured, which is captured by [`PullControl`].
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::Pull;
use crate::regs::RegisterBlock;

pub mod bcm2711;
pub mod bcm2835;

const COMPATIBLE: &str = "/proc/device-tree/compatible";

/// The GPIO controller variant behind the mapped registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chip {
    /// BCM2835, BCM2836 and BCM2837.
    Bcm2835,
    /// BCM2711.
    Bcm2711,
}

impl Chip {
    /// Identify the chip from the device tree.
    ///
    /// Falls back to [`Chip::Bcm2835`] if the device tree cannot be read.
    pub fn detect() -> Self {
        Self::detect_from(Path::new(COMPATIBLE))
    }

    pub(crate) fn detect_from(path: &Path) -> Self {
        match fs::read(path) {
            Ok(compatible) => Self::from_compatible(&compatible),
            Err(err) => {
                log::debug!("cannot read {}: {err}, assuming bcm2835", path.display());
                Chip::Bcm2835
            }
        }
    }

    /// Parse the NUL separated `compatible` property of the device tree root.
    pub fn from_compatible(compatible: &[u8]) -> Self {
        let bcm2711 = compatible
            .split(|&b| b == 0)
            .any(|entry| entry == b"brcm,bcm2711");
        if bcm2711 {
            Chip::Bcm2711
        } else {
            Chip::Bcm2835
        }
    }
}

impl core::fmt::Display for Chip {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Chip::Bcm2835 => f.write_str("bcm2835"),
            Chip::Bcm2711 => f.write_str("bcm2711"),
        }
    }
}

/// How a line's pull resistor is configured, chosen once per pin from the chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PullControl {
    /// Shared selector register latched into the line by a per-bank clock register.
    Latched { clock: usize },
    /// A 2-bit field per line.
    Direct { reg: usize, shift: u32 },
}

impl PullControl {
    pub(crate) fn new(chip: Chip, line: u8) -> Self {
        match chip {
            Chip::Bcm2835 => PullControl::Latched { clock: bcm2835::pull_clock_reg(line) },
            Chip::Bcm2711 => {
                let (reg, shift) = bcm2711::pull_field(line);
                PullControl::Direct { reg, shift }
            }
        }
    }

    /// Highest register index the strategy touches.
    pub(crate) fn max_reg(&self) -> usize {
        match *self {
            PullControl::Latched { clock } => clock.max(bcm2835::Regs::GPPUD.into()),
            PullControl::Direct { reg, .. } => reg,
        }
    }

    /// Apply `pull` to the line. Callers hold the register lock.
    pub(crate) fn apply<R: RegisterBlock + ?Sized>(&self, regs: &R, mask: u32, pull: Pull) {
        match *self {
            PullControl::Latched { clock } => bcm2835::set_pull(regs, clock, mask, pull),
            PullControl::Direct { reg, shift } => bcm2711::set_pull(regs, reg, shift, pull),
        }
    }
}
