#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

mod common;
mod config;
pub mod dev;
mod error;
mod gpio;
mod pin;
mod regs;
mod sysfs;
mod watcher;

pub use common::j8;
pub use common::Edge;
pub use common::Level;
pub use common::Mode;
pub use common::Pull;
pub use common::MAX_LINES;
pub use config::Config;
pub use dev::Chip;
pub use error::Error;
pub use error::Result;
pub use gpio::Gpio;
pub use pin::Pin;
pub use regs::MappedBlock;
pub use regs::MemBlock;
pub use regs::RegisterBlock;
pub use sysfs::EdgeInterface;
pub use sysfs::Readiness;
pub use sysfs::Sysfs;
pub use watcher::Watcher;
