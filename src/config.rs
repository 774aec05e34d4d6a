use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dev::Chip;

/// Settings for a [`crate::Gpio`] context.
///
/// The defaults match Raspberry Pi OS. The crate never reads configuration
/// files itself; deserialize this with whatever serde format the application
/// uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device file exposing the GPIO registers.
    pub device: PathBuf,
    /// Number of bytes to map from `device`.
    pub map_len: usize,
    /// Root of the sysfs GPIO interface used for edge detection.
    pub sysfs_root: PathBuf,
    /// How often to poll for an exported line to become writable.
    pub export_retries: u32,
    /// Delay between those polls, in milliseconds.
    pub export_backoff_ms: u64,
    /// Skip chip detection and assume this variant.
    pub chip: Option<Chip>,
}

impl Config {
    /// [`Config::export_backoff_ms`] as a [`Duration`].
    pub fn export_backoff(&self) -> Duration {
        Duration::from_millis(self.export_backoff_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/gpiomem"),
            map_len: 4096,
            sysfs_root: PathBuf::from("/sys/class/gpio"),
            export_retries: 10,
            export_backoff_ms: 50,
            chip: None,
        }
    }
}
