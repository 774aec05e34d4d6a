//! The sysfs GPIO interface, used only to get edge notifications.
//!
//! Register-mapped access has no way to deliver interrupts, so lines that are
//! watched are also exported through `/sys/class/gpio`, and their `value`
//! files are polled for `POLLPRI`.
use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::common::{Edge, Level};
use crate::config::Config;
use crate::error::{Error, Result};

/// What the watcher should wait for on a value file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Exceptional condition, as raised by `sysfs_notify` on sysfs attributes.
    Priority,
    /// Data available to read, as on a pipe or socket.
    Readable,
}

/// The secondary, file based path that delivers edge notifications for a line.
pub trait EdgeInterface: Send + Sync {
    /// Make the line available for edge notification.
    ///
    /// A line that is already exported counts as success.
    fn export(&self, line: u8) -> Result<()>;

    /// Withdraw the line.
    fn unexport(&self, line: u8) -> Result<()>;

    /// Select the transitions that raise a notification.
    fn set_edge(&self, line: u8, edge: Edge) -> Result<()>;

    /// Open the pollable file that signals the line's edges.
    fn open_value(&self, line: u8) -> Result<File>;

    /// Consume a pending notification on `value` and return the level it reports.
    fn acknowledge(&self, value: &File) -> io::Result<Level>;

    /// The readiness that signals an edge on files from [`EdgeInterface::open_value`].
    fn readiness(&self) -> Readiness {
        Readiness::Priority
    }
}

/// [`EdgeInterface`] over the kernel's `/sys/class/gpio`.
#[derive(Debug, Clone)]
pub struct Sysfs {
    root: PathBuf,
    retries: u32,
    backoff: Duration,
}

impl Sysfs {
    /// Export waits up to `retries` times `backoff` for a line's files to become writable.
    pub fn new(root: impl Into<PathBuf>, retries: u32, backoff: Duration) -> Self {
        Self { root: root.into(), retries, backoff }
    }

    /// Root and retry settings from `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.sysfs_root, config.export_retries, config.export_backoff())
    }

    fn line_path(&self, line: u8, file: &str) -> PathBuf {
        self.root.join(format!("gpio{line}")).join(file)
    }

    fn write_line(&self, file: &str, line: u8) -> io::Result<()> {
        let mut f = OpenOptions::new().write(true).open(self.root.join(file))?;
        f.write_all(line.to_string().as_bytes())
    }

    // Exporting is asynchronous on the kernel side, udev fixes up permissions
    // after the files appear. Can take over 100ms on older boards.
    fn wait_exported(&self, line: u8) -> Result<()> {
        self.wait_writable(line, &self.line_path(line, "value"))?;
        self.wait_writable(line, &self.line_path(line, "edge"))
    }

    fn wait_writable(&self, line: u8, path: &Path) -> Result<()> {
        let mut tries = 0;
        while !writable(path)? {
            tries += 1;
            if tries > self.retries {
                return Err(Error::Timeout(line));
            }
            thread::sleep(self.backoff);
        }
        Ok(())
    }
}

fn writable(path: &Path) -> io::Result<bool> {
    let path = CString::new(path.as_os_str().as_bytes())
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
    Ok(unsafe { libc::access(path.as_ptr(), libc::W_OK) } == 0)
}

impl EdgeInterface for Sysfs {
    fn export(&self, line: u8) -> Result<()> {
        match self.write_line("export", line) {
            Ok(()) => log::debug!("exported gpio{line}"),
            Err(err) if err.raw_os_error() == Some(libc::EBUSY) => {
                log::debug!("gpio{line} already exported");
            }
            Err(err) => return Err(err.into()),
        }
        self.wait_exported(line)
    }

    fn unexport(&self, line: u8) -> Result<()> {
        self.write_line("unexport", line)?;
        log::debug!("unexported gpio{line}");
        Ok(())
    }

    fn set_edge(&self, line: u8, edge: Edge) -> Result<()> {
        let mut f = OpenOptions::new().write(true).open(self.line_path(line, "edge"))?;
        f.write_all(edge.as_str().as_bytes())?;
        Ok(())
    }

    fn open_value(&self, line: u8) -> Result<File> {
        Ok(OpenOptions::new().read(true).write(true).open(self.line_path(line, "value"))?)
    }

    fn acknowledge(&self, value: &File) -> io::Result<Level> {
        // sysfs only rearms POLLPRI once the attribute is read from the start
        let mut buf = [0u8; 2];
        let n = value.read_at(&mut buf, 0)?;
        Ok(Level::from(n > 0 && buf[0] == b'1'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fake_root(name: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!("rpio-sysfs-{}-{name}", std::process::id()));
        let _ = fs::remove_dir_all(&root);
        fs::create_dir_all(root.join("gpio17")).unwrap();
        fs::write(root.join("export"), "").unwrap();
        fs::write(root.join("unexport"), "").unwrap();
        fs::write(root.join("gpio17/value"), "1\n").unwrap();
        fs::write(root.join("gpio17/edge"), "none\n").unwrap();
        root
    }

    #[test]
    fn export_writes_line_number() {
        let root = fake_root("export");
        let sysfs = Sysfs::new(&root, 2, Duration::from_millis(1));
        sysfs.export(17).unwrap();
        assert_eq!(fs::read_to_string(root.join("export")).unwrap(), "17");
        sysfs.unexport(17).unwrap();
        assert_eq!(fs::read_to_string(root.join("unexport")).unwrap(), "17");
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn export_times_out_when_line_never_appears() {
        let root = fake_root("timeout");
        let sysfs = Sysfs::new(&root, 2, Duration::from_millis(1));
        assert!(matches!(sysfs.export(18), Err(Error::Timeout(18))));
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn export_without_sysfs_is_io_error() {
        let sysfs = Sysfs::new("/nonexistent/gpio", 0, Duration::ZERO);
        assert!(matches!(sysfs.export(4), Err(Error::Io(_))));
    }

    #[test]
    fn edge_and_value() {
        let root = fake_root("edge");
        let sysfs = Sysfs::new(&root, 2, Duration::from_millis(1));
        sysfs.set_edge(17, Edge::Both).unwrap();
        assert_eq!(fs::read_to_string(root.join("gpio17/edge")).unwrap(), "both\n");
        let value = sysfs.open_value(17).unwrap();
        assert_eq!(sysfs.acknowledge(&value).unwrap(), Level::High);
        assert_eq!(sysfs.readiness(), Readiness::Priority);
        fs::remove_dir_all(root).unwrap();
    }
}
