use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use embassy_sync::blocking_mutex::CriticalSectionMutex;

use crate::config::Config;
use crate::dev::Chip;
use crate::error::{Error, Result};
use crate::regs::{MappedBlock, RegisterBlock};
use crate::sysfs::{EdgeInterface, Sysfs};
use crate::watcher::Watcher;
use crate::Pin;

/// An open register block, shared by every [`Pin`] created from it.
///
/// The memory stays mapped until the last pin referencing it is dropped, but
/// once the owning [`Gpio`] is closed every pin operation fails with
/// [`Error::NotInitialized`].
pub(crate) struct Mapping {
    pub(crate) regs: Box<dyn RegisterBlock>,
    pub(crate) chip: Chip,
    open: AtomicBool,
    /// Serializes multi-step register sequences (mode and pull changes).
    lock: CriticalSectionMutex<()>,
    edges: Arc<dyn EdgeInterface>,
    watcher: Mutex<Option<Arc<Watcher>>>,
}

impl Mapping {
    fn new(regs: Box<dyn RegisterBlock>, chip: Chip, edges: Arc<dyn EdgeInterface>) -> Self {
        Self {
            regs,
            chip,
            open: AtomicBool::new(true),
            lock: CriticalSectionMutex::new(()),
            edges,
            watcher: Mutex::new(None),
        }
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }

    /// Run a read-modify-write sequence under the register lock.
    pub(crate) fn locked<R>(&self, f: impl FnOnce(&dyn RegisterBlock) -> R) -> Result<R> {
        self.check()?;
        Ok(self.lock.lock(|_| f(&*self.regs)))
    }

    fn watcher_slot(&self) -> MutexGuard<'_, Option<Arc<Watcher>>> {
        self.watcher.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The default watcher, created on first use.
    pub(crate) fn watcher(&self) -> Result<Arc<Watcher>> {
        let mut slot = self.watcher_slot();
        // close clears the flag under this lock too
        self.check()?;
        if let Some(watcher) = slot.as_ref() {
            return Ok(watcher.clone());
        }
        let watcher = Arc::new(Watcher::new(self.edges.clone())?);
        *slot = Some(watcher.clone());
        Ok(watcher)
    }

    /// The default watcher, if one was ever created.
    pub(crate) fn existing_watcher(&self) -> Option<Arc<Watcher>> {
        self.watcher_slot().clone()
    }

    fn close(&self) {
        let watcher = {
            let mut slot = self.watcher_slot();
            self.open.store(false, Ordering::Release);
            slot.take()
        };
        if let Some(watcher) = watcher {
            watcher.close();
        }
    }
}

impl core::fmt::Debug for Mapping {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Mapping")
            .field("chip", &self.chip)
            .field("words", &self.regs.len())
            .field("open", &self.open.load(Ordering::Relaxed))
            .finish()
    }
}

/// Access to the GPIO peripheral: the register map plus its default edge watcher.
///
/// ```no_run
/// use rpio::{Gpio, Level, j8};
///
/// # fn main() -> rpio::Result<()> {
/// let gpio = Gpio::default();
/// gpio.open()?;
/// let mut led = gpio.pin(j8::J8_7)?;
/// led.low()?;
/// led.output()?;
/// led.toggle()?;
/// assert_eq!(led.shadow(), Level::High);
/// gpio.close();
/// # Ok(())
/// # }
/// ```
pub struct Gpio {
    config: Config,
    edges: Arc<dyn EdgeInterface>,
    mapping: Mutex<Option<Arc<Mapping>>>,
}

impl Gpio {
    /// Create an unopened context.
    pub fn new(config: Config) -> Self {
        let edges = Arc::new(Sysfs::from_config(&config));
        Self { config, edges, mapping: Mutex::new(None) }
    }

    /// Replace the edge interface used by watchers created after the next `open`.
    pub fn with_edge_interface(mut self, edges: impl EdgeInterface + 'static) -> Self {
        self.edges = Arc::new(edges);
        self
    }

    /// The settings this context was created with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<Mapping>>> {
        self.mapping.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Map the GPIO registers from the configured device.
    pub fn open(&self) -> Result<()> {
        let mut slot = self.slot();
        if slot.is_some() {
            return Err(Error::AlreadyOpen);
        }
        let block = MappedBlock::map(&self.config.device, self.config.map_len)?;
        let chip = self.config.chip.unwrap_or_else(Chip::detect);
        log::info!("mapped {} from {}", chip, self.config.device.display());
        *slot = Some(Arc::new(Mapping::new(Box::new(block), chip, self.edges.clone())));
        Ok(())
    }

    /// Use `block` as the register map, e.g. to simulate the peripheral.
    pub fn open_with(&self, block: impl RegisterBlock + 'static, chip: Chip) -> Result<()> {
        let mut slot = self.slot();
        if slot.is_some() {
            return Err(Error::AlreadyOpen);
        }
        log::info!("using {} word register block as {}", block.len(), chip);
        *slot = Some(Arc::new(Mapping::new(Box::new(block), chip, self.edges.clone())));
        Ok(())
    }

    /// Stop the default watcher and release the register map.
    ///
    /// Returns once the watcher's loop has exited. A no-op when not open.
    pub fn close(&self) {
        let mapping = self.slot().take();
        if let Some(mapping) = mapping {
            mapping.close();
            log::info!("closed gpio register map");
        }
    }

    /// Whether a register map is installed.
    pub fn is_open(&self) -> bool {
        self.slot().is_some()
    }

    /// The chip behind the open register map.
    pub fn chip(&self) -> Option<Chip> {
        self.slot().as_ref().map(|m| m.chip)
    }

    pub(crate) fn mapping(&self) -> Result<Arc<Mapping>> {
        self.slot().clone().ok_or(Error::NotInitialized)
    }

    /// Create a [`Pin`] for BCM line `line`.
    pub fn pin(&self, line: u8) -> Result<Pin> {
        Pin::new(self, line)
    }

    /// The default watcher used by [`Pin::watch`], created on first use.
    pub fn watcher(&self) -> Result<Arc<Watcher>> {
        self.mapping()?.watcher()
    }
}

impl Default for Gpio {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Drop for Gpio {
    fn drop(&mut self) {
        self.close();
    }
}

impl core::fmt::Debug for Gpio {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Gpio")
            .field("config", &self.config)
            .field("mapping", &*self.slot())
            .finish()
    }
}
