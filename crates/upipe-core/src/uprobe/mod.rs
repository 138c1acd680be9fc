//! Probes: composable event observers attached to pipes.
//!
//! Pipes raise events upward by invoking the head of their probe chain.
//! A probe either consumes the event, amends it and delegates, or passes
//! it untouched to the next probe with [`throw_next`]. Resource-need
//! events carry an answer slot that a provider probe fills in place, so
//! answering never re-enters the pipe.
//!
//! Events that reach the root of a chain unhandled are logged and
//! reported as `Unhandled`; they never crash.

pub mod assert_thread;
pub mod event_log;
pub mod prefix;
pub mod provide;
pub mod select_flow;
pub mod stdio;

pub use assert_thread::UprobeAssertThread;
pub use event_log::UprobeEventLog;
pub use prefix::UprobePrefix;
pub use provide::{UprobeUbufMem, UprobeUclock, UprobeUpumpMgr, UprobeUrefMgr};
pub use select_flow::UprobeSelectFlow;
pub use stdio::UprobeStdio;

use std::any::Any;
use std::rc::Rc;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::ubuf::UbufMgr;
use crate::uclock::UclockRef;
use crate::upump::UpumpMgr;
use crate::uref::{Uref, UrefMgr};
use crate::urequest::UrequestRef;

/// Log severity carried by pipe log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Verbose,
    Debug,
    Info,
    Notice,
    Warning,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Verbose => write!(f, "verbose"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Notice => write!(f, "notice"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Identity of the pipe throwing an event, for log formatting.
#[derive(Debug, Clone)]
pub struct PipeIdent {
    /// Pipe name (module name, possibly refined by the application).
    pub name: String,
    /// Module signature of the pipe's manager.
    pub signature: u32,
}

impl PipeIdent {
    pub fn new(name: impl Into<String>, signature: u32) -> Self {
        Self {
            name: name.into(),
            signature,
        }
    }
}

impl std::fmt::Display for PipeIdent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Events thrown by pipes. The core set is closed; modules extend it
/// through [`Event::Module`] guarded by their signature.
pub enum Event<'a> {
    /// The pipe finished initialising. First event, exactly once.
    Ready,
    /// The pipe is being destroyed. Last event, exactly once.
    Dead,
    /// A log message.
    Log { level: LogLevel, msg: &'a str },
    /// A data-path error; the pipe stays alive but degraded.
    Error(Error),
    /// The output flow definition changed.
    NewFlowDef(&'a Uref),
    /// A request needs a provider.
    ProvideRequest(&'a UrequestRef),
    /// The source hit end-of-stream.
    SourceEnd,
    /// The sink cannot accept more data.
    SinkEnd,
    /// The pipe needs an event loop; a provider fills the slot.
    NeedUpumpMgr(&'a mut Option<UpumpMgr>),
    /// The pipe needs a uref manager; a provider fills the slot.
    NeedUrefMgr(&'a mut Option<Arc<UrefMgr>>),
    /// The pipe needs a payload manager for `flow_def`.
    NeedUbufMgr {
        flow_def: &'a Uref,
        answer: &'a mut Option<UbufMgr>,
    },
    /// The pipe needs a clock; a provider fills the slot.
    NeedUclock(&'a mut Option<UclockRef>),
    /// A new clock reference was seen.
    ClockRef { cr: u64, discontinuity: bool },
    /// Timestamps were decoded on this unit.
    ClockTs { uref: &'a Uref },
    /// Synchronisation with the input stream was acquired.
    SyncAcquired,
    /// Synchronisation with the input stream was lost.
    SyncLost,
    /// Module-specific event, guarded by the module signature.
    Module {
        signature: u32,
        event: &'a mut dyn Any,
    },
}

impl Event<'_> {
    /// Short label for diagnostics.
    pub fn label(&self) -> &'static str {
        match self {
            Event::Ready => "ready",
            Event::Dead => "dead",
            Event::Log { .. } => "log",
            Event::Error(_) => "error",
            Event::NewFlowDef(_) => "new flow def",
            Event::ProvideRequest(_) => "provide request",
            Event::SourceEnd => "source end",
            Event::SinkEnd => "sink end",
            Event::NeedUpumpMgr(_) => "need upump mgr",
            Event::NeedUrefMgr(_) => "need uref mgr",
            Event::NeedUbufMgr { .. } => "need ubuf mgr",
            Event::NeedUclock(_) => "need uclock",
            Event::ClockRef { .. } => "clock ref",
            Event::ClockTs { .. } => "clock ts",
            Event::SyncAcquired => "sync acquired",
            Event::SyncLost => "sync lost",
            Event::Module { .. } => "module event",
        }
    }

    /// Whether leaving this event unhandled deserves a warning: resource
    /// needs and requests expect an answer, informational events do not.
    fn needs_answer(&self) -> bool {
        matches!(
            self,
            Event::ProvideRequest(_)
                | Event::NeedUpumpMgr(_)
                | Event::NeedUrefMgr(_)
                | Event::NeedUbufMgr { .. }
                | Event::NeedUclock(_)
        )
    }
}

impl std::fmt::Debug for Event<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// An event observer.
pub trait Uprobe {
    /// Handle `event` thrown by the pipe identified by `ident`.
    ///
    /// Implementations consume the event (return `Ok`), delegate with
    /// [`throw_next`], or answer `Err(Unhandled)`.
    fn catch(&self, ident: &PipeIdent, event: &mut Event<'_>) -> Result<()>;
}

/// Shared probe handle. Probes are loop-local.
pub type UprobeRef = Rc<dyn Uprobe>;

/// Entry point used by pipes: throw `event` at the head of a chain.
pub fn throw(probe: &UprobeRef, ident: &PipeIdent, event: &mut Event<'_>) -> Result<()> {
    probe.catch(ident, event)
}

/// Delegate an event to the rest of the chain. At the root (no next
/// probe), events expecting an answer are logged as warnings; the event
/// is reported unhandled either way.
pub fn throw_next(
    next: Option<&UprobeRef>,
    ident: &PipeIdent,
    event: &mut Event<'_>,
) -> Result<()> {
    match next {
        Some(probe) => probe.catch(ident, event),
        None => {
            if event.needs_answer() {
                log::warn!("pipe {ident}: event \"{}\" reached the probe chain root unanswered", event.label());
            }
            Err(Error::Unhandled)
        }
    }
}
