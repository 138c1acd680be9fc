//! Single-threaded cooperative event loop.
//!
//! A [`UpumpMgr`] owns a set of *pumps*: timers, file-descriptor watchers
//! (read/write), signal watchers and user events. Pumps are created
//! stopped; `start` arms them, dropping the handle cancels them. A pump
//! carrying live [`UpumpBlocker`] tokens will not fire but keeps its
//! configured state, and re-arms itself when the last blocker is
//! released; sinks exert backpressure on source pumps this way.
//!
//! The loop is driven by `poll(2)`: one call per turn, with the timeout
//! clamped to the nearest armed timer deadline. Ready pumps dispatch
//! between turns, in registration order. Exactly one loop runs per OS
//! thread; nothing here is `Send`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::uclock::duration_from_ticks;

/// Callback invoked when a pump fires.
pub type PumpCb = Box<dyn FnMut()>;

#[derive(Debug)]
enum PumpKind {
    Timer {
        after: Duration,
        repeat: Option<Duration>,
        deadline: Option<Instant>,
    },
    FdRead(RawFd),
    FdWrite(RawFd),
    /// Signal watcher; the byte stream arrives over a self-pipe.
    Signal {
        signum: i32,
        pipe: PipePair,
    },
    /// Cross-thread user event over a self-pipe.
    UserEvent {
        pipe: PipePair,
    },
}

/// Read/write ends of a non-blocking pipe.
#[derive(Debug)]
struct PipePair {
    read: OwnedFd,
    _write: std::sync::Arc<OwnedFd>,
}

fn pipe_pair() -> Result<(PipePair, std::sync::Arc<OwnedFd>)> {
    let mut fds = [0 as libc::c_int; 2];
    // SAFETY: fds is a valid out-array of two ints.
    let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
    if ret != 0 {
        return Err(Error::from(std::io::Error::last_os_error()));
    }
    // SAFETY: pipe2 returned two fresh, owned descriptors.
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    let write = std::sync::Arc::new(write);
    Ok((
        PipePair {
            read,
            _write: std::sync::Arc::clone(&write),
        },
        write,
    ))
}

fn drain_pipe(fd: RawFd) {
    let mut buf = [0u8; 64];
    loop {
        // SAFETY: buf is a valid writable buffer for up to its length.
        let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n <= 0 {
            break;
        }
    }
}

struct PumpState {
    kind: PumpKind,
    started: bool,
    blockers: u32,
    /// Taken out during dispatch so callbacks may touch the loop freely.
    cb: Option<PumpCb>,
    order: u64,
}

impl PumpState {
    fn armed(&self) -> bool {
        self.started && self.blockers == 0
    }
}

#[derive(Default)]
struct LoopInner {
    pumps: HashMap<u64, PumpState>,
    next_id: u64,
    next_order: u64,
    dispatched: u64,
}

/// Event-loop statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct LoopStats {
    /// Pumps currently allocated.
    pub pumps: usize,
    /// Pumps armed (started and unblocked).
    pub armed: usize,
    /// Callbacks dispatched since the loop was created.
    pub dispatched: u64,
}

/// Event-loop manager. Cheap to clone; all clones drive the same loop.
#[derive(Clone, Default)]
pub struct UpumpMgr {
    inner: Rc<RefCell<LoopInner>>,
}

/// Handle owning one pump. Dropping it cancels the pump: pending but
/// unfired events are discarded.
pub struct Upump {
    mgr: Weak<RefCell<LoopInner>>,
    id: u64,
}

/// Token suspending a pump while alive. The pump's configured state is
/// preserved; releasing the last blocker re-arms a started pump.
pub struct UpumpBlocker {
    mgr: Weak<RefCell<LoopInner>>,
    id: u64,
}

/// Cross-thread trigger half of a user-event pump.
#[derive(Clone)]
pub struct UpumpTrigger {
    write: std::sync::Arc<OwnedFd>,
}

impl UpumpTrigger {
    /// Fire the user-event pump from any thread. A full pipe means a
    /// wakeup is already pending, which is just as good.
    pub fn trigger(&self) {
        let byte = [1u8];
        // SAFETY: the Arc keeps the write end open for the call's duration.
        unsafe { libc::write(self.write.as_raw_fd(), byte.as_ptr().cast(), 1) };
    }
}

// ---------------------------------------------------------------------------
// Signal delivery
// ---------------------------------------------------------------------------

const MAX_SIGNUM: usize = 64;

/// Write end of the self-pipe for each watched signal, or -1. The handler
/// only touches this table and `write(2)`, both async-signal-safe.
static SIGNAL_FDS: [AtomicI32; MAX_SIGNUM] = [const { AtomicI32::new(-1) }; MAX_SIGNUM];

extern "C" fn signal_handler(signum: libc::c_int) {
    let idx = signum as usize;
    if idx < MAX_SIGNUM {
        let fd = SIGNAL_FDS[idx].load(Ordering::Relaxed);
        if fd >= 0 {
            let byte = [signum as u8];
            // SAFETY: fd is a valid pipe write end registered by
            // alloc_signal; write is async-signal-safe.
            unsafe { libc::write(fd, byte.as_ptr().cast(), 1) };
        }
    }
}

fn install_signal(signum: i32, write_fd: RawFd) -> Result<()> {
    let idx = signum as usize;
    if idx >= MAX_SIGNUM {
        return Err(Error::Invalid);
    }
    if SIGNAL_FDS[idx]
        .compare_exchange(-1, write_fd, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        // One watcher per signal per process.
        return Err(Error::Busy);
    }
    // SAFETY: sigaction with a handler that only performs
    // async-signal-safe operations.
    let handler: extern "C" fn(libc::c_int) = signal_handler;
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handler as usize;
        action.sa_flags = libc::SA_RESTART;
        if libc::sigaction(signum, &action, std::ptr::null_mut()) != 0 {
            SIGNAL_FDS[idx].store(-1, Ordering::SeqCst);
            return Err(Error::from(std::io::Error::last_os_error()));
        }
    }
    Ok(())
}

fn uninstall_signal(signum: i32) {
    let idx = signum as usize;
    if idx < MAX_SIGNUM {
        SIGNAL_FDS[idx].store(-1, Ordering::SeqCst);
        // SAFETY: restoring the default disposition.
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = libc::SIG_DFL;
            libc::sigaction(signum, &action, std::ptr::null_mut());
        }
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

impl UpumpMgr {
    /// Create an event loop for the current thread.
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, kind: PumpKind, cb: PumpCb) -> Upump {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        let order = inner.next_order;
        inner.next_order += 1;
        inner.pumps.insert(
            id,
            PumpState {
                kind,
                started: false,
                blockers: 0,
                cb: Some(cb),
                order,
            },
        );
        Upump {
            mgr: Rc::downgrade(&self.inner),
            id,
        }
    }

    /// Allocate a timer firing once `after` ticks (27 MHz) from `start`,
    /// then every `repeat` ticks when periodic.
    pub fn alloc_timer(&self, after: u64, repeat: Option<u64>, cb: PumpCb) -> Upump {
        self.register(
            PumpKind::Timer {
                after: duration_from_ticks(after),
                repeat: repeat.map(duration_from_ticks),
                deadline: None,
            },
            cb,
        )
    }

    /// Allocate a watcher firing when `fd` becomes readable.
    pub fn alloc_fd_read(&self, fd: RawFd, cb: PumpCb) -> Upump {
        self.register(PumpKind::FdRead(fd), cb)
    }

    /// Allocate a watcher firing when `fd` becomes writable.
    pub fn alloc_fd_write(&self, fd: RawFd, cb: PumpCb) -> Upump {
        self.register(PumpKind::FdWrite(fd), cb)
    }

    /// Allocate a watcher firing when `signum` is delivered to the
    /// process. One watcher per signal per process.
    pub fn alloc_signal(&self, signum: i32, cb: PumpCb) -> Result<Upump> {
        let (pair, write) = pipe_pair()?;
        install_signal(signum, write.as_raw_fd())?;
        Ok(self.register(PumpKind::Signal { signum, pipe: pair }, cb))
    }

    /// Allocate a user-event pump and its cross-thread trigger.
    pub fn alloc_user_event(&self, cb: PumpCb) -> Result<(Upump, UpumpTrigger)> {
        let (pair, write) = pipe_pair()?;
        let pump = self.register(PumpKind::UserEvent { pipe: pair }, cb);
        Ok((pump, UpumpTrigger { write }))
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> LoopStats {
        let inner = self.inner.borrow();
        LoopStats {
            pumps: inner.pumps.len(),
            armed: inner.pumps.values().filter(|p| p.armed()).count(),
            dispatched: inner.dispatched,
        }
    }

    /// Run one turn: wait for the next event (bounded by `timeout`) and
    /// dispatch every pump that became ready. Returns `false` when no
    /// pump is armed, i.e. the loop would wait forever.
    pub fn run_once(&self, timeout: Option<Duration>) -> bool {
        let now = Instant::now();
        let mut fds: Vec<libc::pollfd> = Vec::new();
        let mut fd_pumps: Vec<u64> = Vec::new();
        let mut nearest: Option<Instant> = None;

        {
            let inner = self.inner.borrow();
            for (&id, pump) in &inner.pumps {
                if !pump.armed() {
                    continue;
                }
                match &pump.kind {
                    PumpKind::Timer { deadline, .. } => {
                        if let Some(d) = deadline {
                            nearest = Some(nearest.map_or(*d, |n| n.min(*d)));
                        }
                    }
                    PumpKind::FdRead(fd) => {
                        fds.push(libc::pollfd {
                            fd: *fd,
                            events: libc::POLLIN,
                            revents: 0,
                        });
                        fd_pumps.push(id);
                    }
                    PumpKind::FdWrite(fd) => {
                        fds.push(libc::pollfd {
                            fd: *fd,
                            events: libc::POLLOUT,
                            revents: 0,
                        });
                        fd_pumps.push(id);
                    }
                    PumpKind::Signal { pipe, .. } | PumpKind::UserEvent { pipe } => {
                        fds.push(libc::pollfd {
                            fd: pipe.read.as_raw_fd(),
                            events: libc::POLLIN,
                            revents: 0,
                        });
                        fd_pumps.push(id);
                    }
                }
            }
        }

        if fds.is_empty() && nearest.is_none() {
            return false;
        }

        let mut wait = match nearest {
            Some(deadline) => Some(deadline.saturating_duration_since(now)),
            None => None,
        };
        if let Some(t) = timeout {
            wait = Some(wait.map_or(t, |w| w.min(t)));
        }
        let timeout_ms: libc::c_int = match wait {
            None => -1,
            Some(w) => {
                let ms = w.as_millis().min(i32::MAX as u128) as libc::c_int;
                // Sub-millisecond waits round up so the loop sleeps
                // instead of spinning until the deadline.
                if ms == 0 && !w.is_zero() { 1 } else { ms }
            }
        };

        // SAFETY: fds points to a valid array of pollfd for its length.
        let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                log::warn!("event loop poll failed: {err}");
            }
            return true;
        }

        // Collect ready pumps, then dispatch outside the borrow.
        let now = Instant::now();
        let mut ready: Vec<(u64, u64)> = Vec::new();
        {
            let mut inner = self.inner.borrow_mut();
            for (slot, &id) in fds.iter().zip(&fd_pumps) {
                if slot.revents == 0 {
                    continue;
                }
                let Some(pump) = inner.pumps.get_mut(&id) else {
                    continue;
                };
                if let PumpKind::Signal { pipe, .. } | PumpKind::UserEvent { pipe } = &pump.kind {
                    drain_pipe(pipe.read.as_raw_fd());
                }
                ready.push((pump.order, id));
            }
            let inner = &mut *inner;
            for (&id, pump) in inner.pumps.iter_mut() {
                if !pump.armed() {
                    continue;
                }
                if let PumpKind::Timer {
                    repeat, deadline, ..
                } = &mut pump.kind
                {
                    if let Some(d) = *deadline {
                        if d <= now {
                            ready.push((pump.order, id));
                            match repeat {
                                Some(r) => *deadline = Some(d + *r),
                                None => {
                                    *deadline = None;
                                    pump.started = false;
                                }
                            }
                        }
                    }
                }
            }
        }

        // Pumps on the same descriptor fire in registration order.
        ready.sort_unstable();
        for (_, id) in ready {
            let cb = self.inner.borrow_mut().pumps.get_mut(&id).and_then(|p| p.cb.take());
            if let Some(mut cb) = cb {
                cb();
                self.inner.borrow_mut().dispatched += 1;
                // The callback may have released its own pump.
                if let Some(pump) = self.inner.borrow_mut().pumps.get_mut(&id) {
                    pump.cb = Some(cb);
                }
            }
        }
        true
    }

    /// Run until no pump is armed.
    pub fn run(&self) {
        while self.run_once(None) {}
    }
}

impl std::fmt::Debug for UpumpMgr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("UpumpMgr")
            .field("pumps", &stats.pumps)
            .field("armed", &stats.armed)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Pump handle
// ---------------------------------------------------------------------------

impl Upump {
    fn with_state<R>(&self, f: impl FnOnce(&mut PumpState) -> R) -> Option<R> {
        let rc = self.mgr.upgrade()?;
        let mut inner = rc.borrow_mut();
        inner.pumps.get_mut(&self.id).map(f)
    }

    /// Arm the pump. For timers this (re)starts the countdown.
    pub fn start(&self) {
        self.with_state(|pump| {
            pump.started = true;
            if let PumpKind::Timer {
                after, deadline, ..
            } = &mut pump.kind
            {
                *deadline = Some(Instant::now() + *after);
            }
        });
    }

    /// Disarm the pump, keeping it allocated.
    pub fn stop(&self) {
        self.with_state(|pump| {
            pump.started = false;
            if let PumpKind::Timer { deadline, .. } = &mut pump.kind {
                *deadline = None;
            }
        });
    }

    /// Whether the pump is currently started (blockers do not change
    /// this).
    pub fn is_started(&self) -> bool {
        self.with_state(|pump| pump.started).unwrap_or(false)
    }

    /// Attach a blocker token. While any token is alive the pump will not
    /// fire.
    pub fn blocker(&self) -> UpumpBlocker {
        self.with_state(|pump| pump.blockers += 1);
        UpumpBlocker {
            mgr: self.mgr.clone(),
            id: self.id,
        }
    }
}

impl Drop for Upump {
    fn drop(&mut self) {
        if let Some(rc) = self.mgr.upgrade() {
            let removed = rc.borrow_mut().pumps.remove(&self.id);
            if let Some(PumpState {
                kind: PumpKind::Signal { signum, .. },
                ..
            }) = removed
            {
                uninstall_signal(signum);
            }
        }
    }
}

impl std::fmt::Debug for Upump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upump").field("id", &self.id).finish()
    }
}

impl Drop for UpumpBlocker {
    fn drop(&mut self) {
        if let Some(rc) = self.mgr.upgrade() {
            if let Some(pump) = rc.borrow_mut().pumps.get_mut(&self.id) {
                pump.blockers = pump.blockers.saturating_sub(1);
            }
        }
    }
}

impl std::fmt::Debug for UpumpBlocker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpumpBlocker").field("pump", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, Write};
    use std::rc::Rc;

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    #[test]
    fn test_one_shot_timer_fires_once() {
        let mgr = UpumpMgr::new();
        let fired = Rc::new(RefCell::new(0u32));
        let fired2 = Rc::clone(&fired);
        let timer = mgr.alloc_timer(27_000, None, Box::new(move || *fired2.borrow_mut() += 1));
        timer.start();
        mgr.run();
        assert_eq!(*fired.borrow(), 1);
        assert!(!timer.is_started());
    }

    #[test]
    fn test_periodic_timer_repeats() {
        let mgr = UpumpMgr::new();
        let fired = Rc::new(RefCell::new(0u32));
        let timer = {
            let fired = Rc::clone(&fired);
            // 1 ms period.
            mgr.alloc_timer(27_000, Some(27_000), Box::new(move || *fired.borrow_mut() += 1))
        };
        timer.start();
        while *fired.borrow() < 3 {
            assert!(mgr.run_once(Some(Duration::from_millis(100))));
        }
        timer.stop();
        assert!(*fired.borrow() >= 3);
    }

    #[test]
    fn test_stopped_timer_does_not_fire() {
        let mgr = UpumpMgr::new();
        let fired = Rc::new(RefCell::new(0u32));
        let timer = {
            let fired = Rc::clone(&fired);
            mgr.alloc_timer(1_000, None, Box::new(move || *fired.borrow_mut() += 1))
        };
        timer.start();
        timer.stop();
        assert!(!mgr.run_once(Some(Duration::from_millis(10))));
        assert_eq!(*fired.borrow(), 0);
    }

    #[test]
    fn test_released_pump_is_cancelled() {
        let mgr = UpumpMgr::new();
        let fired = Rc::new(RefCell::new(0u32));
        let timer = {
            let fired = Rc::clone(&fired);
            mgr.alloc_timer(1_000, None, Box::new(move || *fired.borrow_mut() += 1))
        };
        timer.start();
        drop(timer);
        assert!(!mgr.run_once(Some(Duration::from_millis(10))));
        assert_eq!(*fired.borrow(), 0);
        assert_eq!(mgr.stats().pumps, 0);
    }

    // -----------------------------------------------------------------------
    // Blockers
    // -----------------------------------------------------------------------

    #[test]
    fn test_blocker_suspends_and_resumes() {
        let mgr = UpumpMgr::new();
        let fired = Rc::new(RefCell::new(0u32));
        let timer = {
            let fired = Rc::clone(&fired);
            mgr.alloc_timer(1_000, None, Box::new(move || *fired.borrow_mut() += 1))
        };
        timer.start();
        let blocker = timer.blocker();
        // Blocked: armed count is zero, nothing to wait for.
        assert_eq!(mgr.stats().armed, 0);
        assert!(!mgr.run_once(Some(Duration::from_millis(5))));
        assert_eq!(*fired.borrow(), 0);
        assert!(timer.is_started(), "configured state is preserved");

        drop(blocker);
        assert_eq!(mgr.stats().armed, 1);
        mgr.run();
        assert_eq!(*fired.borrow(), 1);
    }

    #[test]
    fn test_multiple_blockers() {
        let mgr = UpumpMgr::new();
        let timer = mgr.alloc_timer(1_000, None, Box::new(|| {}));
        timer.start();
        let b1 = timer.blocker();
        let b2 = timer.blocker();
        drop(b1);
        assert_eq!(mgr.stats().armed, 0, "one blocker still live");
        drop(b2);
        assert_eq!(mgr.stats().armed, 1);
    }

    // -----------------------------------------------------------------------
    // Fd watchers
    // -----------------------------------------------------------------------

    #[test]
    fn test_fd_read_pump_fires_on_data() {
        let mgr = UpumpMgr::new();
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"payload").unwrap();
        file.seek(std::io::SeekFrom::Start(0)).unwrap();

        let fired = Rc::new(RefCell::new(0u32));
        let pump = {
            let fired = Rc::clone(&fired);
            mgr.alloc_fd_read(file.as_raw_fd(), Box::new(move || *fired.borrow_mut() += 1))
        };
        pump.start();
        assert!(mgr.run_once(Some(Duration::from_millis(100))));
        assert_eq!(*fired.borrow(), 1);
        pump.stop();
    }

    #[test]
    fn test_user_event_trigger_from_thread() {
        let mgr = UpumpMgr::new();
        let fired = Rc::new(RefCell::new(0u32));
        let (pump, trigger) = {
            let fired = Rc::clone(&fired);
            mgr.alloc_user_event(Box::new(move || *fired.borrow_mut() += 1))
                .unwrap()
        };
        pump.start();

        let handle = std::thread::spawn(move || trigger.trigger());
        handle.join().unwrap();
        assert!(mgr.run_once(Some(Duration::from_millis(1000))));
        assert_eq!(*fired.borrow(), 1);
    }

    #[test]
    fn test_coalesced_triggers_fire_once_per_turn() {
        let mgr = UpumpMgr::new();
        let fired = Rc::new(RefCell::new(0u32));
        let (pump, trigger) = {
            let fired = Rc::clone(&fired);
            mgr.alloc_user_event(Box::new(move || *fired.borrow_mut() += 1))
                .unwrap()
        };
        pump.start();
        trigger.trigger();
        trigger.trigger();
        trigger.trigger();
        assert!(mgr.run_once(Some(Duration::from_millis(100))));
        assert_eq!(*fired.borrow(), 1, "pipe is drained per turn");
        pump.stop();
    }

    // -----------------------------------------------------------------------
    // Stats
    // -----------------------------------------------------------------------

    #[test]
    fn test_stats_snapshot_serializes() {
        let mgr = UpumpMgr::new();
        let _t = mgr.alloc_timer(1, None, Box::new(|| {}));
        let json = serde_json::to_string(&mgr.stats()).unwrap();
        assert!(json.contains("\"pumps\":1"));
    }
}
