use std::sync::Arc;

use embedded_hal::digital::{self as hal_digital, ErrorType};

use crate::common::{Edge, Level, Mode, Pull, MAX_LINES};
use crate::dev::{bcm2711, bcm2835::Regs, PullControl};
use crate::error::{Error, Result};
use crate::gpio::{Gpio, Mapping};
use crate::regs::{RegisterBlock, RegisterExt};

const MODE_MASK: u32 = 0b111;

/// One GPIO line, addressed by its BCM number.
///
/// All register indices and masks are worked out once, when the pin is
/// created. Reads and writes are single register accesses and take no lock;
/// mode and pull changes are read-modify-write sequences serialized across
/// every pin of the process.
///
/// Cloning is cheap. Each clone keeps its own [shadow](Pin::shadow).
#[derive(Debug, Clone)]
pub struct Pin {
    line: u8,
    bank: u8,
    mask: u32,
    fsel: usize,
    fsel_shift: u32,
    level_reg: usize,
    set_reg: usize,
    clear_reg: usize,
    pull: PullControl,
    shadow: Level,
    mapping: Arc<Mapping>,
}

impl Pin {
    /// Create a pin on the open register map of `gpio`.
    ///
    /// Fails with [`Error::NotInitialized`] if `gpio` is not open and
    /// [`Error::InvalidLine`] if `line` is beyond the mapped banks.
    pub fn new(gpio: &Gpio, line: u8) -> Result<Self> {
        Self::with_mapping(gpio.mapping()?, line)
    }

    pub(crate) fn with_mapping(mapping: Arc<Mapping>, line: u8) -> Result<Self> {
        mapping.check()?;
        if line >= MAX_LINES {
            return Err(Error::InvalidLine(line));
        }
        let bank = line / 32;
        let pin = Self {
            line,
            bank,
            mask: 1 << (line % 32),
            fsel: usize::from(Regs::GPFSEL0) + usize::from(line / 10),
            fsel_shift: u32::from(line % 10) * 3,
            level_reg: usize::from(Regs::GPLEV0) + usize::from(bank),
            set_reg: usize::from(Regs::GPSET0) + usize::from(bank),
            clear_reg: usize::from(Regs::GPCLR0) + usize::from(bank),
            pull: PullControl::new(mapping.chip, line),
            shadow: Level::Low,
            mapping,
        };
        // the block must cover every register this line touches
        if pin.pull.max_reg().max(pin.level_reg) >= pin.mapping.regs.len() {
            return Err(Error::InvalidLine(line));
        }
        let mut pin = pin;
        pin.shadow = pin.level(&*pin.mapping.regs);
        Ok(pin)
    }

    fn regs(&self) -> Result<&dyn RegisterBlock> {
        self.mapping.check()?;
        Ok(&*self.mapping.regs)
    }

    fn level(&self, regs: &dyn RegisterBlock) -> Level {
        Level::from(regs.read(self.level_reg) & self.mask != 0)
    }

    /// The BCM line number.
    pub fn line(&self) -> u8 {
        self.line
    }

    /// The register bank holding this line's set, clear and level bits.
    pub fn bank(&self) -> u8 {
        self.bank
    }

    /// This line's bit within its bank's registers.
    pub fn mask(&self) -> u32 {
        self.mask
    }

    /// Current function of the line.
    pub fn mode(&self) -> Result<Mode> {
        let regs = self.regs()?;
        Ok(Mode::from_bits(regs.read(self.fsel) >> self.fsel_shift))
    }

    /// Change the function of the line.
    pub fn set_mode(&self, mode: Mode) -> Result<()> {
        let shift = self.fsel_shift;
        self.mapping.locked(|regs| {
            regs.update(self.fsel, mode.bits() << shift, (MODE_MASK << shift) & !(mode.bits() << shift))
        })
    }

    /// Make the line an input.
    pub fn input(&self) -> Result<()> {
        self.set_mode(Mode::Input)
    }

    /// Make the line an output.
    pub fn output(&self) -> Result<()> {
        self.set_mode(Mode::Output)
    }

    /// Sample the line's level. Also updates the shadow.
    pub fn read(&mut self) -> Result<Level> {
        let level = self.level(self.regs()?);
        self.shadow = level;
        Ok(level)
    }

    /// Drive the line to `level`. Only has an effect while the line is an output.
    pub fn write(&mut self, level: Level) -> Result<()> {
        let regs = self.regs()?;
        match level {
            Level::Low => regs.write(self.clear_reg, self.mask),
            Level::High => regs.write(self.set_reg, self.mask),
        }
        self.shadow = level;
        Ok(())
    }

    /// Drive the line high.
    pub fn high(&mut self) -> Result<()> {
        self.write(Level::High)
    }

    /// Drive the line low.
    pub fn low(&mut self) -> Result<()> {
        self.write(Level::Low)
    }

    /// Write the complement of the shadow.
    ///
    /// The hardware is not re-read, so changes made through other pins or
    /// processes since the last `read`/`write` on this pin are not seen.
    pub fn toggle(&mut self) -> Result<()> {
        self.write(!self.shadow)
    }

    /// The level last read from or written to the line through this pin.
    pub fn shadow(&self) -> Level {
        self.shadow
    }

    /// Configure the internal pull resistor.
    pub fn set_pull(&self, pull: Pull) -> Result<()> {
        let mask = self.mask;
        self.mapping.locked(|regs| self.pull.apply(regs, mask, pull))
    }

    /// Shorthand for `set_pull(Pull::Up)`.
    pub fn pull_up(&self) -> Result<()> {
        self.set_pull(Pull::Up)
    }

    /// Shorthand for `set_pull(Pull::Down)`.
    pub fn pull_down(&self) -> Result<()> {
        self.set_pull(Pull::Down)
    }

    /// Shorthand for `set_pull(Pull::None)`.
    pub fn pull_none(&self) -> Result<()> {
        self.set_pull(Pull::None)
    }

    /// Read back the pull configuration.
    ///
    /// `None` on chips where the pull state is write-only (the BCM2835 family),
    /// so callers there have to track it themselves.
    pub fn pull(&self) -> Result<Option<Pull>> {
        let regs = self.regs()?;
        Ok(match self.pull {
            PullControl::Latched { .. } => None,
            PullControl::Direct { reg, shift } => bcm2711::pull(regs, reg, shift),
        })
    }

    /// Call `handler` on each `edge` of the line, using the default watcher.
    ///
    /// The handler is called once straight away, so it can pick up the
    /// current level, and then for each edge. It runs on a dispatch thread
    /// with its own clone of this pin. Only one watch per line may exist;
    /// a second fails with [`Error::Busy`].
    pub fn watch<F>(&self, edge: Edge, handler: F) -> Result<()>
    where
        F: FnMut(&mut Pin) + Send + 'static,
    {
        self.mapping.watcher()?.register_pin(self, edge, handler)
    }

    /// Remove any watch from the line.
    pub fn unwatch(&self) {
        if let Some(watcher) = self.mapping.existing_watcher() {
            watcher.unregister_pin(self);
        }
    }
}

impl ErrorType for Pin {
    type Error = Error;
}

impl hal_digital::InputPin for Pin {
    fn is_high(&mut self) -> Result<bool> {
        Ok(self.read()? == Level::High)
    }

    fn is_low(&mut self) -> Result<bool> {
        Ok(self.read()? == Level::Low)
    }
}

impl hal_digital::OutputPin for Pin {
    fn set_low(&mut self) -> Result<()> {
        self.write(Level::Low)
    }

    fn set_high(&mut self) -> Result<()> {
        self.write(Level::High)
    }
}

impl hal_digital::StatefulOutputPin for Pin {
    /// This method does **not** read the pin's electrical state.
    fn is_set_high(&mut self) -> Result<bool> {
        Ok(self.shadow == Level::High)
    }

    fn is_set_low(&mut self) -> Result<bool> {
        Ok(self.shadow == Level::Low)
    }

    fn toggle(&mut self) -> Result<()> {
        Pin::toggle(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev::Chip;
    use crate::regs::MemBlock;
    use embedded_hal::digital::{OutputPin, StatefulOutputPin};

    fn open(chip: Chip) -> (Gpio, Arc<MemBlock>) {
        let block = Arc::new(MemBlock::new(1024));
        let gpio = Gpio::default();
        gpio.open_with(block.clone(), chip).unwrap();
        (gpio, block)
    }

    #[test]
    fn derived_registers() {
        let (gpio, _) = open(Chip::Bcm2835);
        let pin = gpio.pin(4).unwrap();
        assert_eq!((pin.bank, pin.mask, pin.fsel, pin.fsel_shift), (0, 1 << 4, 0, 12));
        assert_eq!((pin.level_reg, pin.set_reg, pin.clear_reg), (13, 7, 10));

        let pin = gpio.pin(53).unwrap();
        assert_eq!((pin.bank, pin.mask, pin.fsel, pin.fsel_shift), (1, 1 << 21, 5, 9));
        assert_eq!((pin.level_reg, pin.set_reg, pin.clear_reg), (14, 8, 11));
        assert_eq!(pin.pull, PullControl::Latched { clock: 39 });
    }

    #[test]
    fn derivation_is_deterministic() {
        let (gpio, _) = open(Chip::Bcm2711);
        for line in 0..MAX_LINES {
            let a = gpio.pin(line).unwrap();
            let b = gpio.pin(line).unwrap();
            assert_eq!(
                (a.bank, a.mask, a.fsel, a.fsel_shift, a.level_reg, a.set_reg, a.clear_reg, a.pull),
                (b.bank, b.mask, b.fsel, b.fsel_shift, b.level_reg, b.set_reg, b.clear_reg, b.pull)
            );
        }
    }

    #[test]
    fn masks_in_a_bank_are_distinct_bits() {
        let (gpio, _) = open(Chip::Bcm2835);
        let mut seen = [0u32; 2];
        for line in 0..MAX_LINES {
            let pin = gpio.pin(line).unwrap();
            assert_eq!(pin.mask.count_ones(), 1);
            let bank = usize::from(pin.bank);
            assert_eq!(seen[bank] & pin.mask, 0);
            seen[bank] |= pin.mask;
        }
        assert_eq!(seen, [u32::MAX, (1 << 22) - 1]);
    }

    #[test]
    fn invalid_line() {
        let (gpio, _) = open(Chip::Bcm2835);
        assert!(matches!(gpio.pin(MAX_LINES), Err(Error::InvalidLine(54))));
        assert!(matches!(gpio.pin(255), Err(Error::InvalidLine(255))));
    }

    #[test]
    fn short_block_rejects_lines() {
        let gpio = Gpio::default();
        gpio.open_with(MemBlock::new(14), Chip::Bcm2835).unwrap();
        assert!(matches!(gpio.pin(4), Err(Error::InvalidLine(4))));
    }

    #[test]
    fn set_mode_keeps_neighbours() {
        let (gpio, block) = open(Chip::Bcm2835);
        block.write(1, 0x3fff_ffff);
        let pin = gpio.pin(13).unwrap();
        pin.set_mode(Mode::Alt0).unwrap();
        assert_eq!(block.read(1), 0x3fff_ffff & !(0b111 << 9) | (0b100 << 9));
        assert_eq!(pin.mode().unwrap(), Mode::Alt0);
        pin.input().unwrap();
        assert_eq!(pin.mode().unwrap(), Mode::Input);
        assert_eq!(block.read(1), 0x3fff_ffff & !(0b111 << 9));
        pin.output().unwrap();
        assert_eq!(gpio.pin(12).unwrap().mode().unwrap(), Mode::Alt3);
    }

    #[test]
    fn write_uses_set_and_clear() {
        let (gpio, block) = open(Chip::Bcm2835);
        let mut pin = gpio.pin(40).unwrap();
        pin.high().unwrap();
        assert_eq!(block.read(8), 1 << 8);
        assert_eq!(pin.shadow(), Level::High);
        pin.low().unwrap();
        assert_eq!(block.read(11), 1 << 8);
        assert_eq!(pin.shadow(), Level::Low);
    }

    #[test]
    fn read_updates_shadow() {
        let (gpio, block) = open(Chip::Bcm2835);
        let mut pin = gpio.pin(5).unwrap();
        assert_eq!(pin.shadow(), Level::Low);
        block.write(13, 1 << 5);
        assert_eq!(pin.shadow(), Level::Low);
        assert_eq!(pin.read().unwrap(), Level::High);
        assert_eq!(pin.shadow(), Level::High);
        // new pins start from the hardware level
        assert_eq!(gpio.pin(5).unwrap().shadow(), Level::High);
    }

    #[test]
    fn toggle_follows_shadow() {
        let (gpio, block) = open(Chip::Bcm2835);
        let mut pin = gpio.pin(17).unwrap();
        pin.write(Level::High).unwrap();
        pin.toggle().unwrap();
        assert_eq!(pin.shadow(), Level::Low);
        assert_eq!(block.read(10), 1 << 17);
        pin.toggle().unwrap();
        assert_eq!(pin.shadow(), Level::High);
        // external changes are not reconciled
        block.write(7, 0);
        block.write(13, 0);
        pin.toggle().unwrap();
        assert_eq!(pin.shadow(), Level::Low);
    }

    #[test]
    fn direct_pull_round_trips() {
        let (gpio, block) = open(Chip::Bcm2711);
        let pin = gpio.pin(20).unwrap();
        pin.pull_down().unwrap();
        assert_eq!(block.read(58), 2 << 8);
        assert_eq!(pin.pull().unwrap(), Some(Pull::Down));
        pin.pull_up().unwrap();
        assert_eq!(pin.pull().unwrap(), Some(Pull::Up));
        pin.pull_none().unwrap();
        assert_eq!(block.read(58), 0);
    }

    #[test]
    fn latched_pull_is_write_only() {
        let (gpio, block) = open(Chip::Bcm2835);
        let pin = gpio.pin(20).unwrap();
        pin.pull_up().unwrap();
        // selector and clock are cleared once latched
        assert_eq!(block.read(37), 0);
        assert_eq!(block.read(38), 0);
        assert_eq!(pin.pull().unwrap(), None);
    }

    #[test]
    fn operations_fail_after_close() {
        let (gpio, _) = open(Chip::Bcm2835);
        let mut pin = gpio.pin(4).unwrap();
        gpio.close();
        assert!(matches!(pin.read(), Err(Error::NotInitialized)));
        assert!(matches!(pin.write(Level::High), Err(Error::NotInitialized)));
        assert!(matches!(pin.set_mode(Mode::Output), Err(Error::NotInitialized)));
        assert!(matches!(pin.pull_up(), Err(Error::NotInitialized)));
        assert!(matches!(pin.watch(Edge::Both, |_| {}), Err(Error::NotInitialized)));
        pin.unwatch();
        // a fresh open does not revive old pins
        gpio.open_with(MemBlock::new(64), Chip::Bcm2835).unwrap();
        assert!(matches!(pin.mode(), Err(Error::NotInitialized)));
        assert!(gpio.pin(4).unwrap().mode().is_ok());
    }

    #[test]
    fn concurrent_set_mode_loses_no_updates() {
        let (gpio, block) = open(Chip::Bcm2835);
        // lines 10-19 share GPFSEL1
        let workers: Vec<_> = (10..20u8)
            .map(|line| {
                let pin = gpio.pin(line).unwrap();
                std::thread::spawn(move || {
                    let target = Mode::from_bits(u32::from(line % 7) + 1);
                    for i in 0..=1000 {
                        let mode = if i % 2 == 0 { target } else { Mode::Input };
                        pin.set_mode(mode).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        for line in 10..20u8 {
            let field = (block.read(1) >> (u32::from(line % 10) * 3)) & MODE_MASK;
            assert_eq!(Mode::from_bits(field), Mode::from_bits(u32::from(line % 7) + 1), "line {line}");
        }
    }

    #[test]
    fn concurrent_direct_pull_loses_no_updates() {
        let (gpio, block) = open(Chip::Bcm2711);
        // lines 0-15 share GPIO_PUP_PDN_CNTRL_REG0
        let workers: Vec<_> = (0..16u8)
            .map(|line| {
                let pin = gpio.pin(line).unwrap();
                std::thread::spawn(move || {
                    let target = if line % 2 == 0 { Pull::Up } else { Pull::Down };
                    for i in 0..=1000 {
                        let pull = if i % 2 == 0 { target } else { Pull::None };
                        pin.set_pull(pull).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        // up is 0b01 and down 0b10 per field
        assert_eq!(block.read(57), 0x9999_9999);
        for line in 0..16u8 {
            let expected = if line % 2 == 0 { Pull::Up } else { Pull::Down };
            assert_eq!(gpio.pin(line).unwrap().pull().unwrap(), Some(expected), "line {line}");
        }
    }

    #[test]
    fn embedded_hal_output() {
        let (gpio, block) = open(Chip::Bcm2835);
        let mut pin = gpio.pin(6).unwrap();
        OutputPin::set_high(&mut pin).unwrap();
        assert!(pin.is_set_high().unwrap());
        StatefulOutputPin::toggle(&mut pin).unwrap();
        assert!(pin.is_set_low().unwrap());
        assert_eq!(block.read(10), 1 << 6);
    }
}
