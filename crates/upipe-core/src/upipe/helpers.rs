//! Reusable building blocks for pipe implementations.
//!
//! These are plain structs a pipe embeds as fields and drives from its
//! `input`/`control` methods; most pipes are a thin layer of module logic
//! stitched over them. [`PipeCore`] carries identity and the probe chain;
//! [`OutputHelper`] the downstream linkage and request proxying;
//! [`InputHelper`] the hold queue and backpressure blockers; the resource
//! helpers acquire managers and clocks through probe events with a
//! request-based fallback.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::ubuf::UbufMgr;
use crate::uclock::UclockRef;
use crate::upump::{PumpCb, Upump, UpumpBlocker, UpumpMgr};
use crate::uprobe::{Event, LogLevel, PipeIdent, UprobeRef, throw};
use crate::uref::{Uref, UrefMgr};
use crate::urequest::{RequestAnswer, RequestKind, Urequest, UrequestRef};

use super::{AllocArgs, PipeCmd, Upipe, UpipeControl, UpipeRef};

// ---------------------------------------------------------------------------
// Pipe core: identity, probe chain, lifecycle events
// ---------------------------------------------------------------------------

/// Identity and probe chain of one pipe.
pub struct PipeCore {
    ident: PipeIdent,
    probe: UprobeRef,
    ready: bool,
    dead: bool,
}

impl PipeCore {
    /// Take ownership of the probe chain head.
    pub fn new(name: impl Into<String>, signature: u32, probe: UprobeRef) -> Self {
        Self {
            ident: PipeIdent::new(name, signature),
            probe,
            ready: false,
            dead: false,
        }
    }

    pub fn ident(&self) -> &PipeIdent {
        &self.ident
    }

    /// Refine the pipe name shown in logs.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.ident.name = name.into();
    }

    /// Throw an event at the probe chain.
    pub fn throw(&self, event: &mut Event<'_>) -> Result<()> {
        debug_assert!(
            self.ready && !self.dead,
            "event {} outside the ready..dead window",
            event.label()
        );
        throw(&self.probe, &self.ident, event)
    }

    /// Throw `ready`. Called exactly once, at the end of allocation.
    pub fn throw_ready(&mut self) {
        debug_assert!(!self.ready, "ready thrown twice");
        self.ready = true;
        let _ = throw(&self.probe, &self.ident, &mut Event::Ready);
    }

    /// Throw `dead`. Called exactly once, at the start of destruction.
    pub fn throw_dead(&mut self) {
        debug_assert!(!self.dead, "dead thrown twice");
        if !self.dead {
            self.dead = true;
            let _ = throw(&self.probe, &self.ident, &mut Event::Dead);
        }
    }

    /// Report a data-path error: the event is thrown, the pipe lives on.
    pub fn throw_error(&self, err: Error) {
        let _ = self.throw(&mut Event::Error(err));
    }

    /// Send a log message up the chain.
    pub fn log(&self, level: LogLevel, msg: &str) {
        let _ = self.throw(&mut Event::Log { level, msg });
    }

    pub fn dbg(&self, msg: &str) {
        self.log(LogLevel::Debug, msg);
    }

    pub fn info(&self, msg: &str) {
        self.log(LogLevel::Info, msg);
    }

    pub fn warn(&self, msg: &str) {
        self.log(LogLevel::Warning, msg);
    }

    pub fn err(&self, msg: &str) {
        self.log(LogLevel::Error, msg);
    }
}

// ---------------------------------------------------------------------------
// Allocation argument checking
// ---------------------------------------------------------------------------

/// Unpack the flow definition a flow-parameterised pipe is allocated
/// with, checking its prefix.
pub fn expect_flow(args: AllocArgs, prefix: &str) -> Result<Uref> {
    match args {
        AllocArgs::Flow(flow_def) if flow_def.flow_def_matches(prefix) => Ok(flow_def),
        _ => Err(Error::Invalid),
    }
}

/// Check that a pipe was allocated without arguments.
pub fn expect_void(args: AllocArgs) -> Result<()> {
    match args {
        AllocArgs::Void => Ok(()),
        AllocArgs::Flow(_) => Err(Error::Invalid),
    }
}

// ---------------------------------------------------------------------------
// Output linkage
// ---------------------------------------------------------------------------

/// Downstream output pointer, current output flow definition and the
/// list of requests proxied through this pipe.
#[derive(Default)]
pub struct OutputHelper {
    output: Option<UpipeRef>,
    flow_def: Option<Uref>,
    flow_def_sent: bool,
    requests: Vec<UrequestRef>,
}

impl OutputHelper {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current output flow definition.
    pub fn flow_def(&self) -> Option<&Uref> {
        self.flow_def.as_ref()
    }

    pub fn output(&self) -> Option<&UpipeRef> {
        self.output.as_ref()
    }

    /// Store a new output flow definition and announce it. It is sent to
    /// the output ahead of the next unit.
    pub fn store_flow_def(&mut self, core: &PipeCore, flow_def: Uref) {
        let _ = core.throw(&mut Event::NewFlowDef(&flow_def));
        self.flow_def = Some(flow_def);
        self.flow_def_sent = false;
    }

    /// Emit one unit to the output, sending the pending flow definition
    /// first. Without an output the unit is dropped with a warning.
    pub fn emit(&mut self, core: &PipeCore, uref: Uref, upump: Option<&Upump>) {
        let Some(output) = self.output.clone() else {
            core.warn("no output configured, dropping unit");
            return;
        };
        if !self.flow_def_sent {
            if let Some(flow_def) = &self.flow_def {
                if output.set_flow_def(flow_def).is_err() {
                    core.warn("output refused flow definition, dropping unit");
                    return;
                }
            }
            self.flow_def_sent = true;
        }
        output.send(uref, upump);
    }

    /// Handle the output-related subset of control commands; answers
    /// `Unhandled` for everything else so the pipe can try other helpers.
    pub fn control(&mut self, core: &PipeCore, cmd: &mut PipeCmd<'_>) -> Result<()> {
        match cmd {
            PipeCmd::SetOutput(output) => {
                let new = output.take();
                if let Some(old) = &self.output {
                    for request in &self.requests {
                        let _ = old.unregister_request(request.clone());
                    }
                }
                if let Some(new) = &new {
                    for request in &self.requests {
                        let _ = new.register_request(request.clone());
                    }
                }
                self.output = new;
                // A new output gets the current flow def re-sent.
                self.flow_def_sent = false;
                Ok(())
            }
            PipeCmd::GetOutput(slot) => {
                **slot = self.output.clone();
                Ok(())
            }
            PipeCmd::GetFlowDef(slot) => {
                **slot = self.flow_def.as_ref().map(Uref::dup);
                Ok(())
            }
            PipeCmd::RegisterRequest(request) => {
                self.requests.push(request.clone());
                match &self.output {
                    Some(output) => output.register_request(request.clone()),
                    // Nobody downstream: ask the probe chain.
                    None => core.throw(&mut Event::ProvideRequest(request)),
                }
            }
            PipeCmd::UnregisterRequest(request) => {
                self.requests.retain(|r| !Rc::ptr_eq(r, request));
                if let Some(output) = &self.output {
                    let _ = output.unregister_request(request.clone());
                }
                Ok(())
            }
            _ => Err(Error::Unhandled),
        }
    }
}

// ---------------------------------------------------------------------------
// Input hold queue
// ---------------------------------------------------------------------------

/// Hold queue and blocker set for pipes that cannot always process
/// immediately.
#[derive(Default)]
pub struct InputHelper {
    held: VecDeque<Uref>,
    max_length: Option<usize>,
    blockers: Vec<UpumpBlocker>,
}

impl InputHelper {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when nothing is held.
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn set_max_length(&mut self, max: usize) {
        self.max_length = Some(max);
    }

    pub fn max_length(&self) -> Option<usize> {
        self.max_length
    }

    /// Hold a unit at the back of the queue. When the queue is over its
    /// bound and the producing pump is known, a blocker is taken on it so
    /// the producer stops feeding us.
    pub fn hold(&mut self, uref: Uref, upump: Option<&Upump>) {
        self.held.push_back(uref);
        if let (Some(max), Some(upump)) = (self.max_length, upump) {
            if self.held.len() >= max {
                self.blockers.push(upump.blocker());
            }
        }
    }

    /// Drain held units in order through `handle`. A handler returning
    /// `Err(uref)` puts the unit back at the front and stops. Returns
    /// true, releasing all blockers, when the queue fully drained.
    pub fn drain(
        &mut self,
        mut handle: impl FnMut(Uref) -> std::result::Result<(), Uref>,
    ) -> bool {
        while let Some(uref) = self.held.pop_front() {
            if let Err(back) = handle(uref) {
                self.held.push_front(back);
                return false;
            }
        }
        self.unblock();
        true
    }

    /// Take a blocker on the producing pump unconditionally, regardless
    /// of the queue bound.
    pub fn block(&mut self, upump: &Upump) {
        self.blockers.push(upump.blocker());
    }

    /// Release every blocker, letting producer pumps fire again.
    pub fn unblock(&mut self) {
        self.blockers.clear();
    }

    /// Number of live blockers.
    pub fn blocked(&self) -> usize {
        self.blockers.len()
    }

    /// Handle the max-length subset of control commands.
    pub fn control(&mut self, cmd: &mut PipeCmd<'_>) -> Result<()> {
        match cmd {
            PipeCmd::SetMaxLength(max) => {
                self.max_length = Some(*max);
                Ok(())
            }
            PipeCmd::GetMaxLength(slot) => {
                **slot = self.max_length;
                Ok(())
            }
            _ => Err(Error::Unhandled),
        }
    }
}

// ---------------------------------------------------------------------------
// Sync tracking
// ---------------------------------------------------------------------------

/// Tracks input synchronisation, throwing `sync-acquired`/`sync-lost`
/// on transitions only.
#[derive(Default)]
pub struct SyncHelper {
    acquired: bool,
}

impl SyncHelper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired
    }

    pub fn acquired(&mut self, core: &PipeCore) {
        if !self.acquired {
            self.acquired = true;
            let _ = core.throw(&mut Event::SyncAcquired);
        }
    }

    pub fn lost(&mut self, core: &PipeCore) {
        if self.acquired {
            self.acquired = false;
            let _ = core.throw(&mut Event::SyncLost);
        }
    }
}

// ---------------------------------------------------------------------------
// Resource helpers
// ---------------------------------------------------------------------------

/// Answer slot shared with a pending request's callback. Deferred
/// answers land here and are picked up at the pipe's next operation.
type PendingAnswer = Rc<RefCell<Option<RequestAnswer>>>;

macro_rules! poll_pending {
    ($self:ident, $variant:ident => $field:ident) => {
        let taken = $self.pending.borrow_mut().take();
        if let Some(RequestAnswer::$variant(value)) = taken {
            $self.$field = Some(value);
        }
    };
}

/// Acquires and tracks a uref manager.
#[derive(Default)]
pub struct UrefMgrHelper {
    mgr: Option<Arc<UrefMgr>>,
    pending: PendingAnswer,
    request: Option<UrequestRef>,
}

impl UrefMgrHelper {
    pub fn new() -> Self {
        Self::default()
    }

    /// The manager, if already acquired (picks up deferred answers).
    pub fn get(&mut self) -> Option<&Arc<UrefMgr>> {
        poll_pending!(self, UrefMgr => mgr);
        self.mgr.as_ref()
    }

    /// Try to acquire: first through the probe chain, then by leaving a
    /// request travelling the output chain. Returns the manager when
    /// available now; `None` means "hold your input and retry".
    pub fn demand(&mut self, core: &PipeCore, output: &mut OutputHelper) -> Option<&Arc<UrefMgr>> {
        if self.get().is_some() {
            return self.mgr.as_ref();
        }
        let mut slot = None;
        let _ = core.throw(&mut Event::NeedUrefMgr(&mut slot));
        if slot.is_some() {
            self.mgr = slot;
            return self.mgr.as_ref();
        }
        if self.request.is_none() {
            let pending = Rc::clone(&self.pending);
            let request = Urequest::new(RequestKind::UrefMgr, None, move |answer| {
                *pending.borrow_mut() = Some(answer);
            });
            self.request = Some(request.clone());
            let _ = output.control(core, &mut PipeCmd::RegisterRequest(request));
        }
        None
    }

    /// Drop the tracked manager and withdraw the pending request.
    pub fn clean(&mut self, core: &PipeCore, output: &mut OutputHelper) {
        if let Some(request) = self.request.take() {
            let _ = output.control(core, &mut PipeCmd::UnregisterRequest(request));
        }
        self.mgr = None;
    }
}

/// Acquires and tracks a payload-buffer manager for one flow format.
#[derive(Default)]
pub struct UbufMgrHelper {
    mgr: Option<UbufMgr>,
    pending: PendingAnswer,
    request: Option<UrequestRef>,
}

impl UbufMgrHelper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self) -> Option<&UbufMgr> {
        let taken = self.pending.borrow_mut().take();
        if let Some(RequestAnswer::UbufMgr(mgr, _)) = taken {
            self.mgr = Some(mgr);
        }
        self.mgr.as_ref()
    }

    /// Try to acquire a manager able to allocate payloads for
    /// `flow_def`.
    pub fn demand(
        &mut self,
        core: &PipeCore,
        output: &mut OutputHelper,
        flow_def: &Uref,
    ) -> Option<&UbufMgr> {
        if self.get().is_some() {
            return self.mgr.as_ref();
        }
        let mut answer = None;
        let _ = core.throw(&mut Event::NeedUbufMgr {
            flow_def,
            answer: &mut answer,
        });
        if answer.is_some() {
            self.mgr = answer;
            return self.mgr.as_ref();
        }
        if self.request.is_none() {
            let pending = Rc::clone(&self.pending);
            let request = Urequest::new(
                RequestKind::UbufMgr,
                Some(flow_def.dup()),
                move |answer| {
                    *pending.borrow_mut() = Some(answer);
                },
            );
            self.request = Some(request.clone());
            let _ = output.control(core, &mut PipeCmd::RegisterRequest(request));
        }
        None
    }

    /// Forget the tracked manager (e.g. on flow change).
    pub fn release(&mut self) {
        self.mgr = None;
        self.pending.borrow_mut().take();
    }

    pub fn clean(&mut self, core: &PipeCore, output: &mut OutputHelper) {
        if let Some(request) = self.request.take() {
            let _ = output.control(core, &mut PipeCmd::UnregisterRequest(request));
        }
        self.release();
    }
}

/// Acquires and tracks a clock.
#[derive(Default)]
pub struct UclockHelper {
    uclock: Option<UclockRef>,
    pending: PendingAnswer,
    request: Option<UrequestRef>,
}

impl UclockHelper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self) -> Option<&UclockRef> {
        poll_pending!(self, Uclock => uclock);
        self.uclock.as_ref()
    }

    pub fn demand(&mut self, core: &PipeCore, output: &mut OutputHelper) -> Option<&UclockRef> {
        if self.get().is_some() {
            return self.uclock.as_ref();
        }
        let mut slot = None;
        let _ = core.throw(&mut Event::NeedUclock(&mut slot));
        if slot.is_some() {
            self.uclock = slot;
            return self.uclock.as_ref();
        }
        if self.request.is_none() {
            let pending = Rc::clone(&self.pending);
            let request = Urequest::new(RequestKind::Uclock, None, move |answer| {
                *pending.borrow_mut() = Some(answer);
            });
            self.request = Some(request.clone());
            let _ = output.control(core, &mut PipeCmd::RegisterRequest(request));
        }
        None
    }

    /// Handle `attach-uclock`.
    pub fn control(&mut self, cmd: &mut PipeCmd<'_>) -> Result<()> {
        match cmd {
            PipeCmd::AttachUclock(uclock) => {
                self.uclock = Some(Arc::clone(uclock));
                Ok(())
            }
            _ => Err(Error::Unhandled),
        }
    }
}

/// Acquires and tracks the event loop.
#[derive(Default)]
pub struct UpumpMgrHelper {
    mgr: Option<UpumpMgr>,
}

impl UpumpMgrHelper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<&UpumpMgr> {
        self.mgr.as_ref()
    }

    /// Try to acquire through the probe chain.
    pub fn demand(&mut self, core: &PipeCore) -> Option<&UpumpMgr> {
        if self.mgr.is_none() {
            let mut slot = None;
            let _ = core.throw(&mut Event::NeedUpumpMgr(&mut slot));
            self.mgr = slot;
        }
        self.mgr.as_ref()
    }

    /// Handle `attach-upump-mgr`.
    pub fn control(&mut self, cmd: &mut PipeCmd<'_>) -> Result<()> {
        match cmd {
            PipeCmd::AttachUpumpMgr(mgr) => {
                self.mgr = Some(mgr.clone());
                Ok(())
            }
            _ => Err(Error::Unhandled),
        }
    }
}

/// Slot holding the one pump a source or sink runs on.
#[derive(Default)]
pub struct PumpSlot {
    pump: Option<Rc<Upump>>,
}

impl PumpSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<&Rc<Upump>> {
        self.pump.as_ref()
    }

    /// Allocate and start a timer, replacing (and thereby cancelling)
    /// any previous pump in the slot.
    pub fn wait_timer(
        &mut self,
        mgr: &UpumpMgr,
        after: u64,
        repeat: Option<u64>,
        cb: PumpCb,
    ) -> Rc<Upump> {
        let pump = Rc::new(mgr.alloc_timer(after, repeat, cb));
        pump.start();
        self.pump = Some(Rc::clone(&pump));
        pump
    }

    /// Install an externally allocated pump and start it.
    pub fn set(&mut self, pump: Upump) {
        pump.start();
        self.pump = Some(Rc::new(pump));
    }

    /// Cancel the held pump.
    pub fn clear(&mut self) {
        self.pump = None;
    }
}

// ---------------------------------------------------------------------------
// Sub-pipes
// ---------------------------------------------------------------------------

/// Child tracking for join/split parents. The parent holds weak handles
/// (children keep the parent alive through their own strong handle, so a
/// strong list here would leak the family).
#[derive(Default)]
pub struct SubPipeHelper {
    children: Vec<Weak<RefCell<dyn Upipe>>>,
}

impl SubPipeHelper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly allocated child.
    pub fn add(&mut self, child: &UpipeRef) {
        self.children.push(Rc::downgrade(child));
    }

    /// Live children, pruning the ones already destroyed.
    pub fn iter(&mut self) -> Vec<UpipeRef> {
        self.children.retain(|w| w.strong_count() > 0);
        self.children.iter().filter_map(Weak::upgrade).collect()
    }

    /// Number of live children.
    pub fn len(&mut self) -> usize {
        self.iter().len()
    }

    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }
}
