use core::ops::Not;

/// Number of GPIO lines covered by the primary register banks.
pub const MAX_LINES: u8 = 54;

/// Logic level of a line, as seen on the hardware (no active-low inversion).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    /// Line reads 0.
    Low,
    /// Line reads 1.
    High,
}

impl Not for Level {
    type Output = Level;

    fn not(self) -> Level {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

impl From<Level> for bool {
    fn from(level: Level) -> bool {
        level == Level::High
    }
}

/// Function select value of a line.
///
/// Discriminants match the 3-bit GPFSEL field encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Mode {
    #[allow(missing_docs)]
    Input = 0,
    #[allow(missing_docs)]
    Output = 1,
    /// Alternate functions, numbered as in the peripheral datasheet.
    Alt5 = 2,
    #[allow(missing_docs)]
    Alt4 = 3,
    #[allow(missing_docs)]
    Alt0 = 4,
    #[allow(missing_docs)]
    Alt1 = 5,
    #[allow(missing_docs)]
    Alt2 = 6,
    #[allow(missing_docs)]
    Alt3 = 7,
}

impl Mode {
    /// Decode a function select field. Only the low three bits are used.
    pub fn from_bits(bits: u32) -> Self {
        match bits & 0b111 {
            0 => Mode::Input,
            1 => Mode::Output,
            2 => Mode::Alt5,
            3 => Mode::Alt4,
            4 => Mode::Alt0,
            5 => Mode::Alt1,
            6 => Mode::Alt2,
            _ => Mode::Alt3,
        }
    }

    /// The 3-bit field value for this mode.
    pub fn bits(self) -> u32 {
        self as u32
    }
}

/// Internal pull resistor configuration.
///
/// The register encoding differs per chip, see [`crate::dev`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pull {
    /// Floating.
    None,
    /// Pulled to ground.
    Down,
    /// Pulled to 3.3V.
    Up,
}

/// The change in level that triggers an interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    /// No transitions trigger.
    None,
    /// Low to high.
    Rising,
    /// High to low.
    Falling,
    /// Any change of level.
    Both,
}

impl Edge {
    /// The value written to the sysfs `edge` file.
    pub fn as_str(self) -> &'static str {
        match self {
            Edge::None => "none",
            Edge::Rising => "rising",
            Edge::Falling => "falling",
            Edge::Both => "both",
        }
    }
}

impl core::fmt::Display for Edge {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// BCM line numbers of the GPIO pins on the 40-pin J8 header.
///
/// The crate addresses lines by BCM number; these constants name them by
/// physical header position instead.
#[allow(missing_docs)]
pub mod j8 {
    pub const J8_3: u8 = 2;
    pub const J8_5: u8 = 3;
    pub const J8_7: u8 = 4;
    pub const J8_8: u8 = 14;
    pub const J8_10: u8 = 15;
    pub const J8_11: u8 = 17;
    pub const J8_12: u8 = 18;
    pub const J8_13: u8 = 27;
    pub const J8_15: u8 = 22;
    pub const J8_16: u8 = 23;
    pub const J8_18: u8 = 24;
    pub const J8_19: u8 = 10;
    pub const J8_21: u8 = 9;
    pub const J8_22: u8 = 25;
    pub const J8_23: u8 = 11;
    pub const J8_24: u8 = 8;
    pub const J8_26: u8 = 7;
    pub const J8_27: u8 = 0;
    pub const J8_28: u8 = 1;
    pub const J8_29: u8 = 5;
    pub const J8_31: u8 = 6;
    pub const J8_32: u8 = 12;
    pub const J8_33: u8 = 13;
    pub const J8_35: u8 = 19;
    pub const J8_36: u8 = 16;
    pub const J8_37: u8 = 26;
    pub const J8_38: u8 = 20;
    pub const J8_40: u8 = 21;
}
