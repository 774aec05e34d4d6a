//! Register layout of the BCM2835 GPIO block.
//!
//! Datasheet: <https://datasheets.raspberrypi.com/bcm2835/bcm2835-peripherals.pdf>, section 6.
//!
//! Offsets are in 32-bit words from the start of the block. Registers that
//! come in pairs (one per bank of 32 lines) are listed by their bank 0 word.
use std::thread;
use std::time::Duration;

use crate::common::Pull;
use crate::regs::RegisterBlock;

/// Time for a pull selector to clock into the line, at least 150 core cycles.
pub(crate) const PULL_SETTLE: Duration = Duration::from_micros(1);

#[allow(dead_code, non_camel_case_types, clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Regs {
    /// GPFSEL0-5: function select, 3 bits per line, 10 lines per register
    GPFSEL0 = 0,
    /// GPSET0/1: write 1 to drive the line high
    GPSET0 = 7,
    /// GPCLR0/1: write 1 to drive the line low
    GPCLR0 = 10,
    /// GPLEV0/1: current level of each line
    GPLEV0 = 13,
    /// GPPUD: pull selector shared by all lines, 2 bits
    GPPUD = 37,
    /// GPPUDCLK0/1: latches GPPUD into the lines whose bit is set
    GPPUDCLK0 = 38,
}

impl From<Regs> for usize {
    fn from(r: Regs) -> usize {
        r as usize
    }
}

const PULL_MASK: u32 = 0b11;

pub(crate) fn pull_clock_reg(line: u8) -> usize {
    usize::from(Regs::GPPUDCLK0) + usize::from(line / 32)
}

/// GPPUD encoding.
pub(crate) fn pull_bits(pull: Pull) -> u32 {
    match pull {
        Pull::None => 0,
        Pull::Down => 1,
        Pull::Up => 2,
    }
}

/// Run the GPPUD/GPPUDCLK sequence for the lines in `mask`.
///
/// The pull state cannot be read back from hardware.
pub(crate) fn set_pull<R: RegisterBlock + ?Sized>(regs: &R, clock: usize, mask: u32, pull: Pull) {
    let pud = usize::from(Regs::GPPUD);
    let bits = pull_bits(pull);
    regs.write(pud, (regs.read(pud) & !PULL_MASK) | bits);
    thread::sleep(PULL_SETTLE);
    regs.write(clock, mask);
    thread::sleep(PULL_SETTLE);
    regs.write(pud, regs.read(pud) & !PULL_MASK);
    regs.write(clock, 0);
}
