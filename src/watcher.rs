//! Edge notification for pins.
//!
//! A [`Watcher`] runs one loop thread blocked in `epoll_wait` on the value
//! files of all watched lines plus the read end of a shutdown pipe. When a
//! line's file wakes, the loop queues an event for that line's dispatch
//! thread, which calls the user handler. Handlers of one line never overlap;
//! handlers of different lines run concurrently, in no particular order.
//!
//! Dispatch is fire-and-forget relative to teardown: once a line is
//! unregistered, or the watcher is closed, no new handler call starts for
//! it, but a call already running is left to finish.
use std::fs::File;
use std::io::{self, Write};
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use heapless::FnvIndexMap;

use crate::common::{Edge, MAX_LINES};
use crate::error::{Error, Result};
use crate::sysfs::{EdgeInterface, Readiness};
use crate::Pin;

/// Capacity of the registry, the next power of two above `MAX_LINES`.
const SLOTS: usize = 64;

/// Epoll token of the shutdown pipe.
const SHUTDOWN: u64 = u64::MAX;

/// Epoll token of one registration: the line in the low byte, a per-watcher
/// registration count above it. Events queued for a registration that has
/// since been replaced carry a stale count and are dropped.
fn token(line: u8, generation: u64) -> u64 {
    (generation << 8) | u64::from(line)
}

fn token_line(token: u64) -> u8 {
    (token & 0xff) as u8
}

struct Epoll(OwnedFd);

impl Epoll {
    fn new() -> io::Result<Self> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self(unsafe { OwnedFd::from_raw_fd(fd) }))
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, events: u32, token: u64) -> io::Result<()> {
        let mut event = libc::epoll_event { events, u64: token };
        if unsafe { libc::epoll_ctl(self.0.as_raw_fd(), op, fd, &mut event) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn add(&self, fd: RawFd, events: u32, token: u64) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, events, token)
    }

    fn delete(&self, fd: RawFd) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_DEL, fd, 0, 0)
    }

    /// Block until at least one descriptor is ready.
    fn wait(&self, events: &mut [libc::epoll_event]) -> io::Result<usize> {
        let max = events.len().min(libc::c_int::MAX as usize) as libc::c_int;
        let n = unsafe { libc::epoll_wait(self.0.as_raw_fd(), events.as_mut_ptr(), max, -1) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }
}

fn interest(readiness: Readiness) -> u32 {
    match readiness {
        Readiness::Priority => (libc::EPOLLPRI | libc::EPOLLERR | libc::EPOLLET) as u32,
        Readiness::Readable => (libc::EPOLLIN | libc::EPOLLET) as u32,
    }
}

fn set_nonblocking(fd: RawFd, nonblocking: bool) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let flags = if nonblocking {
        flags | libc::O_NONBLOCK
    } else {
        flags & !libc::O_NONBLOCK
    };
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// A live registration.
struct Interrupt {
    line: u8,
    token: u64,
    value: File,
    events: Sender<()>,
    live: Arc<AtomicBool>,
}

#[derive(Default)]
struct Registry {
    interrupts: FnvIndexMap<u8, Interrupt, SLOTS>,
    /// Registrations made so far, for epoll tokens.
    generation: u64,
    closed: bool,
}

struct Shared {
    epoll: Epoll,
    edges: Arc<dyn EdgeInterface>,
    registry: Mutex<Registry>,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configure an exported line and hook its value file into epoll.
    fn arm<F>(&self, pin: &Pin, edge: Edge, token: u64, mut handler: F) -> Result<Interrupt>
    where
        F: FnMut(&mut Pin) + Send + 'static,
    {
        let line = pin.line();
        self.edges.set_edge(line, edge)?;
        let value = self.edges.open_value(line)?;
        // clear whatever is pending from before the watch
        self.edges.acknowledge(&value)?;
        let fd = value.as_raw_fd();
        set_nonblocking(fd, true)?;

        let (events, queue) = mpsc::channel::<()>();
        let live = Arc::new(AtomicBool::new(true));
        let mut watched = pin.clone();
        let running = live.clone();
        thread::Builder::new()
            .name(format!("rpio-gpio{line}"))
            .spawn(move || {
                for () in queue {
                    if !running.load(Ordering::Acquire) {
                        break;
                    }
                    handler(&mut watched);
                }
            })?;
        let irq = Interrupt { line, token, value, events, live };

        if let Err(err) = self.epoll.add(fd, interest(self.edges.readiness()), token) {
            irq.live.store(false, Ordering::Release);
            return Err(err.into());
        }
        Ok(irq)
    }

    /// Undo everything `arm` and the export did for the line.
    fn release(&self, irq: Interrupt) {
        let Interrupt { line, value, events, live, .. } = irq;
        live.store(false, Ordering::Release);
        drop(events);
        let fd = value.as_raw_fd();
        if let Err(err) = self.epoll.delete(fd) {
            log::warn!("removing gpio{line} from epoll: {err}");
        }
        if let Err(err) = set_nonblocking(fd, false) {
            log::warn!("restoring blocking mode on gpio{line}: {err}");
        }
        // the value file has to be closed before the line goes away
        drop(value);
        self.unexport(line);
    }

    fn unexport(&self, line: u8) {
        if let Err(err) = self.edges.unexport(line) {
            log::warn!("unexporting gpio{line}: {err}");
        }
    }

    fn dispatch(&self, token: u64) {
        let registry = self.registry();
        let Some(irq) = registry.interrupts.get(&token_line(token)) else {
            return;
        };
        if irq.token != token {
            log::debug!("dropping stale event for gpio{}", irq.line);
            return;
        }
        if let Err(err) = self.edges.acknowledge(&irq.value) {
            log::debug!("reading gpio{} value: {err}", irq.line);
        }
        // a closed queue means the dispatcher already stopped
        let _ = irq.events.send(());
    }
}

fn run(shared: Arc<Shared>, _done: OwnedFd) {
    let mut events = [libc::epoll_event { events: 0, u64: 0 }; MAX_LINES as usize + 1];
    loop {
        let n = match shared.epoll.wait(&mut events) {
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                log::error!("epoll_wait failed, stopping watcher: {err}");
                return;
            }
        };
        for event in &events[..n] {
            let token = event.u64;
            if token == SHUTDOWN {
                log::debug!("watcher shutting down");
                return;
            }
            shared.dispatch(token);
        }
    }
}

/// Watches pins for the level transitions that trigger interrupts.
///
/// Most code uses [`Pin::watch`], which goes through the default watcher
/// of the pin's [`crate::Gpio`]. A standalone watcher can be created with
/// its own [`EdgeInterface`].
pub struct Watcher {
    shared: Arc<Shared>,
    shutdown: Mutex<Option<File>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Watcher {
    /// Start a watcher and its loop thread.
    pub fn new(edges: Arc<dyn EdgeInterface>) -> Result<Self> {
        let epoll = Epoll::new()?;
        let mut fds = [0 as libc::c_int; 2];
        if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } < 0 {
            return Err(io::Error::last_os_error().into());
        }
        let (done, shutdown) = unsafe { (OwnedFd::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])) };
        epoll.add(done.as_raw_fd(), libc::EPOLLIN as u32, SHUTDOWN)?;

        let shared = Arc::new(Shared { epoll, edges, registry: Mutex::new(Registry::default()) });
        let looped = shared.clone();
        let thread = thread::Builder::new()
            .name("rpio-watcher".into())
            .spawn(move || run(looped, done))?;
        log::debug!("watcher started");
        Ok(Self {
            shared,
            shutdown: Mutex::new(Some(shutdown)),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Watch `pin` for `edge` and call `handler` on each one.
    ///
    /// `handler` is called once as soon as the watch is in place, then for
    /// each matching edge. Fails with [`Error::Busy`] if the line is already
    /// watched, leaving the existing watch untouched, and with
    /// [`Error::Timeout`] if the line never becomes available on the edge
    /// interface. A failed registration leaves the line unexported.
    pub fn register_pin<F>(&self, pin: &Pin, edge: Edge, handler: F) -> Result<()>
    where
        F: FnMut(&mut Pin) + Send + 'static,
    {
        let line = pin.line();
        let mut registry = self.shared.registry();
        if registry.closed {
            return Err(Error::Closed);
        }
        if registry.interrupts.contains_key(&line) {
            return Err(Error::Busy(line));
        }
        if let Err(err) = self.shared.edges.export(line) {
            // the export itself went through, only the files never became usable
            if matches!(err, Error::Timeout(_)) {
                self.shared.unexport(line);
            }
            return Err(err);
        }
        registry.generation = registry.generation.wrapping_add(1);
        let token = token(line, registry.generation);
        let irq = match self.shared.arm(pin, edge, token, handler) {
            Ok(irq) => irq,
            Err(err) => {
                self.shared.unexport(line);
                return Err(err);
            }
        };
        // initial call, reporting the current level
        let _ = irq.events.send(());
        // lines are below MAX_LINES, so the map cannot be full
        if let Err((_, irq)) = registry.interrupts.insert(line, irq) {
            self.shared.release(irq);
            return Err(Error::Busy(line));
        }
        log::debug!("watching gpio{line} for {edge} edges");
        Ok(())
    }

    /// Remove any watch on `pin`. A no-op if there is none.
    pub fn unregister_pin(&self, pin: &Pin) {
        let line = pin.line();
        let mut registry = self.shared.registry();
        if let Some(irq) = registry.interrupts.remove(&line) {
            self.shared.release(irq);
            log::debug!("stopped watching gpio{line}");
        }
    }

    /// Whether `pin`'s line is currently watched.
    pub fn is_registered(&self, pin: &Pin) -> bool {
        self.shared.registry().interrupts.contains_key(&pin.line())
    }

    /// Remove every watch and stop the loop thread.
    ///
    /// Returns after the loop has exited; no handler call starts afterwards.
    pub fn close(&self) {
        {
            let mut registry = self.shared.registry();
            if registry.closed {
                return;
            }
            registry.closed = true;
            let lines: heapless::Vec<u8, SLOTS> = registry.interrupts.keys().copied().collect();
            for line in lines {
                if let Some(irq) = registry.interrupts.remove(&line) {
                    self.shared.release(irq);
                }
            }
        }

        let shutdown = self.shutdown.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(mut shutdown) = shutdown {
            if let Err(err) = shutdown.write_all(b"bye") {
                log::error!("signalling watcher shutdown: {err}");
            }
        }
        let thread = self.thread.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(thread) = thread {
            if thread.thread().id() == thread::current().id() {
                return;
            }
            if thread.join().is_err() {
                log::error!("watcher thread panicked");
            }
        }
        log::debug!("watcher closed");
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.close();
    }
}

impl core::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let registry = self.shared.registry();
        f.debug_struct("Watcher")
            .field("lines", &registry.interrupts.keys().collect::<Vec<_>>())
            .field("closed", &registry.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Level;
    use crate::dev::Chip;
    use crate::regs::MemBlock;
    use crate::Gpio;
    use std::io::Read;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);
    const QUIET: Duration = Duration::from_millis(100);

    /// Value files are pipes nobody writes to; events are injected by token.
    #[derive(Default)]
    struct Pipes {
        writers: Mutex<Vec<File>>,
    }

    impl EdgeInterface for Pipes {
        fn export(&self, _line: u8) -> Result<()> {
            Ok(())
        }

        fn unexport(&self, _line: u8) -> Result<()> {
            Ok(())
        }

        fn set_edge(&self, _line: u8, _edge: Edge) -> Result<()> {
            Ok(())
        }

        fn open_value(&self, _line: u8) -> Result<File> {
            let mut fds = [0; 2];
            if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) } < 0 {
                return Err(io::Error::last_os_error().into());
            }
            let (read, write) = unsafe { (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])) };
            self.writers.lock().unwrap().push(write);
            Ok(read)
        }

        fn acknowledge(&self, mut value: &File) -> io::Result<Level> {
            let mut buf = [0u8; 16];
            match value.read(&mut buf) {
                Err(err) if err.kind() != io::ErrorKind::WouldBlock => Err(err),
                _ => Ok(Level::Low),
            }
        }

        fn readiness(&self) -> Readiness {
            Readiness::Readable
        }
    }

    fn token_of(watcher: &Watcher, line: u8) -> u64 {
        watcher.shared.registry().interrupts.get(&line).map(|irq| irq.token).unwrap()
    }

    #[test]
    fn tokens_carry_the_line() {
        assert_eq!(token_line(token(53, 7)), 53);
        assert_ne!(token(5, 1), token(5, 2));
        assert_ne!(token(5, 1), SHUTDOWN);
    }

    #[test]
    fn stale_events_are_dropped() {
        let gpio = Gpio::default();
        gpio.open_with(MemBlock::new(64), Chip::Bcm2835).unwrap();
        let watcher = Watcher::new(Arc::new(Pipes::default())).unwrap();
        let (tx, rx) = mpsc::channel();

        let five = gpio.pin(5).unwrap();
        let sender = tx.clone();
        watcher
            .register_pin(&five, Edge::Both, move |p| {
                let _ = sender.send(p.line());
            })
            .unwrap();
        assert_eq!(rx.recv_timeout(WAIT), Ok(5));
        let old = token_of(&watcher, 5);
        watcher.unregister_pin(&five);

        // likely reuses the descriptor line 5 just gave up
        let six = gpio.pin(6).unwrap();
        let sender = tx.clone();
        watcher
            .register_pin(&six, Edge::Both, move |p| {
                let _ = sender.send(p.line());
            })
            .unwrap();
        assert_eq!(rx.recv_timeout(WAIT), Ok(6));
        watcher.shared.dispatch(old);
        assert!(rx.recv_timeout(QUIET).is_err());

        // a line registered again does not inherit events of its earlier watch
        let before = token_of(&watcher, 6);
        watcher.unregister_pin(&six);
        watcher
            .register_pin(&six, Edge::Both, move |p| {
                let _ = tx.send(p.line());
            })
            .unwrap();
        assert_eq!(rx.recv_timeout(WAIT), Ok(6));
        watcher.shared.dispatch(before);
        assert!(rx.recv_timeout(QUIET).is_err());

        watcher.shared.dispatch(token_of(&watcher, 6));
        assert_eq!(rx.recv_timeout(WAIT), Ok(6));
    }
}
