//! Word access to the GPIO register block.
//!
//! All pin arithmetic ends up as an index into a block of 32-bit registers.
//! [`RegisterBlock`] is the seam between that arithmetic and the storage: a
//! [`MappedBlock`] over `/dev/gpiomem` on real hardware, or a [`MemBlock`]
//! for simulation.
use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Indexed access to a block of 32-bit registers.
///
/// Single word reads and writes are assumed to be atomic with respect to
/// other threads. Implementations panic on an out of range index, like slice
/// indexing; callers validate indices against [`RegisterBlock::len`] up front.
pub trait RegisterBlock: Send + Sync {
    /// Number of 32-bit words in the block.
    fn len(&self) -> usize;

    /// Read the word at `idx`.
    fn read(&self, idx: usize) -> u32;

    /// Write `value` to the word at `idx`.
    fn write(&self, idx: usize, value: u32);

    /// Returns `true` if the block has no words.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: RegisterBlock + ?Sized> RegisterBlock for Arc<T> {
    fn len(&self) -> usize {
        (**self).len()
    }

    fn read(&self, idx: usize) -> u32 {
        (**self).read(idx)
    }

    fn write(&self, idx: usize, value: u32) {
        (**self).write(idx, value)
    }
}

impl<T: RegisterBlock + ?Sized> RegisterBlock for Box<T> {
    fn len(&self) -> usize {
        (**self).len()
    }

    fn read(&self, idx: usize) -> u32 {
        (**self).read(idx)
    }

    fn write(&self, idx: usize, value: u32) {
        (**self).write(idx, value)
    }
}

pub(crate) trait RegisterExt {
    /// Read-modify-write: set the bits in `mask_set`, then clear the bits in `mask_clear`.
    ///
    /// Not atomic; callers hold the register lock.
    fn update(&self, idx: usize, mask_set: u32, mask_clear: u32);
}

impl<R: RegisterBlock + ?Sized> RegisterExt for R {
    fn update(&self, idx: usize, mask_set: u32, mask_clear: u32) {
        let mut val = self.read(idx);
        val |= mask_set;
        val &= !mask_clear;
        self.write(idx, val);
    }
}

/// The GPIO registers mapped from a device file.
#[derive(Debug)]
pub struct MappedBlock {
    base: NonNull<u32>,
    words: usize,
    bytes: usize,
}

// The mapping is plain device memory; every access is a volatile word access.
unsafe impl Send for MappedBlock {}
unsafe impl Sync for MappedBlock {}

impl MappedBlock {
    /// Map `len` bytes of `device` read/write and shared.
    ///
    /// The device file is only held open for the duration of the `mmap` call.
    pub fn map(device: &Path, len: usize) -> io::Result<Self> {
        if len < 4 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "map length below one word"));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(device)?;
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let base = NonNull::new(addr as *mut u32)
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))?;
        Ok(Self { base, words: len / 4, bytes: len })
    }
}

impl RegisterBlock for MappedBlock {
    fn len(&self) -> usize {
        self.words
    }

    fn read(&self, idx: usize) -> u32 {
        assert!(idx < self.words, "register {idx} outside mapped block of {} words", self.words);
        unsafe { ptr::read_volatile(self.base.as_ptr().add(idx)) }
    }

    fn write(&self, idx: usize, value: u32) {
        assert!(idx < self.words, "register {idx} outside mapped block of {} words", self.words);
        unsafe { ptr::write_volatile(self.base.as_ptr().add(idx), value) }
    }
}

impl Drop for MappedBlock {
    fn drop(&mut self) {
        let rc = unsafe { libc::munmap(self.base.as_ptr().cast(), self.bytes) };
        if rc != 0 {
            log::warn!("munmap of gpio registers failed: {}", io::Error::last_os_error());
        }
    }
}

/// A register block held in ordinary memory.
///
/// Reads return whatever was last written; none of the hardware side effects
/// (set/clear registers driving the level register) are modelled.
#[derive(Debug)]
pub struct MemBlock {
    words: Box<[AtomicU32]>,
}

impl MemBlock {
    /// A zeroed block of `words` registers.
    pub fn new(words: usize) -> Self {
        Self { words: (0..words).map(|_| AtomicU32::new(0)).collect() }
    }
}

impl RegisterBlock for MemBlock {
    fn len(&self) -> usize {
        self.words.len()
    }

    fn read(&self, idx: usize) -> u32 {
        self.words[idx].load(Ordering::SeqCst)
    }

    fn write(&self, idx: usize, value: u32) {
        self.words[idx].store(value, Ordering::SeqCst)
    }
}
