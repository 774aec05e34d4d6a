//! Pull configuration of the BCM2711 GPIO block.
//!
//! Datasheet: <https://datasheets.raspberrypi.com/bcm2711/bcm2711-peripherals.pdf>, section 5.
//!
//! Everything but the pull registers matches [`super::bcm2835`]. The BCM2711
//! drops GPPUD/GPPUDCLK in favour of a directly writable 2-bit field per line.
use crate::common::Pull;
use crate::regs::{RegisterBlock, RegisterExt};

#[allow(dead_code, non_camel_case_types, clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Regs {
    /// GPIO_PUP_PDN_CNTRL_REG0-3: 2 bits per line, 16 lines per register
    GPIO_PUP_PDN_CNTRL_REG0 = 57,
}

impl From<Regs> for usize {
    fn from(r: Regs) -> usize {
        r as usize
    }
}

const PULL_MASK: u32 = 0b11;

/// Register index and bit shift of the line's pull field.
pub(crate) fn pull_field(line: u8) -> (usize, u32) {
    let reg = usize::from(Regs::GPIO_PUP_PDN_CNTRL_REG0) + usize::from(line / 16);
    let shift = u32::from(line % 16) * 2;
    (reg, shift)
}

/// GPIO_PUP_PDN_CNTRL encoding. Up and down are swapped relative to GPPUD.
pub(crate) fn pull_bits(pull: Pull) -> u32 {
    match pull {
        Pull::None => 0,
        Pull::Up => 1,
        Pull::Down => 2,
    }
}

pub(crate) fn set_pull<R: RegisterBlock + ?Sized>(regs: &R, reg: usize, shift: u32, pull: Pull) {
    let bits = pull_bits(pull) << shift;
    regs.update(reg, bits, (PULL_MASK << shift) & !bits);
}

/// Read back the line's pull field.
pub(crate) fn pull<R: RegisterBlock + ?Sized>(regs: &R, reg: usize, shift: u32) -> Option<Pull> {
    match (regs.read(reg) >> shift) & PULL_MASK {
        0 => Some(Pull::None),
        1 => Some(Pull::Up),
        2 => Some(Pull::Down),
        _ => None,
    }
}
