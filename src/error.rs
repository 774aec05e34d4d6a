use embedded_hal::digital;

/// Errors returned by the register map, pins and the edge watcher.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `open` was called while a mapping already exists.
    #[error("gpio register map already open")]
    AlreadyOpen,
    /// No register map is open, so no register addresses exist.
    #[error("gpio register map not initialized")]
    NotInitialized,
    /// The line number is outside the mapped register banks.
    #[error("gpio line {0} out of range")]
    InvalidLine(u8),
    /// The line already has a live edge registration.
    #[error("gpio line {0} already in use")]
    Busy(u8),
    /// The edge interface did not make the line available in time.
    #[error("timed out waiting for gpio line {0} to be exported")]
    Timeout(u8),
    /// The watcher has been closed.
    #[error("watcher closed")]
    Closed,
    /// I/O failure from the device or the edge interface.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

impl digital::Error for Error {
    fn kind(&self) -> digital::ErrorKind {
        digital::ErrorKind::Other
    }
}
