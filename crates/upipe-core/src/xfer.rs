//! Cross-thread pipe proxies.
//!
//! A pipe always runs on the loop that built it. To drive a pipe from
//! another thread, the caller allocates a *proxy* through a transfer
//! manager: the proxy marshals input and control into envelopes pushed
//! onto a bounded [`crate::uqueue`] read by the remote loop, where the
//! real pipe is built and driven. Events raised by the remote pipe travel
//! back through a symmetric queue and are re-thrown at the proxy's probe
//! chain on the local loop.
//!
//! Envelope order is FIFO in both directions; queue overflow bounces the
//! envelope to the proxy, which holds it and blocks the producing pump.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};
use crate::upipe::helpers::{InputHelper, PipeCore};
use crate::upipe::{PipeCmd, Upipe, UpipeControl, UpipeRef};
use crate::uprobe::{Event, LogLevel, PipeIdent, Uprobe, UprobeRef, throw, throw_next};
use crate::upump::{Upump, UpumpMgr};
use crate::uqueue::{Uqueue, UqueuePushError, uqueue};
use crate::uref::Uref;

/// Module signature of transfer proxies.
pub const XFER_SIGNATURE: u32 = 0x78666572; // "xfer"

/// `Send`-able subset of control commands a proxy marshals.
#[derive(Debug)]
pub enum XferCmd {
    SetFlowDef(Uref),
    SetOption { name: String, value: String },
    /// Attach the remote loop's own pump manager.
    AttachUpumpMgr,
    SetMaxLength(usize),
    SetOutputSize(usize),
}

/// Events marshalled back from the remote pipe.
#[derive(Debug)]
pub enum XferEvent {
    Log(LogLevel, String),
    Error(Error),
    NewFlowDef(Uref),
    SourceEnd,
    SinkEnd,
}

type XferEventMsg = (u64, XferEvent);
type BuildFn = Box<dyn FnOnce(&XferCtx) -> Result<UpipeRef> + Send>;

enum XferMsg {
    /// Build the real pipe on the remote loop under slot `id`.
    Attach {
        id: u64,
        events: Uqueue<XferEventMsg>,
        build: BuildFn,
    },
    Input {
        id: u64,
        uref: Uref,
    },
    Control {
        id: u64,
        cmd: XferCmd,
    },
    Detach {
        id: u64,
    },
}

/// Context handed to pipe builders on the remote loop.
pub struct XferCtx {
    /// The remote loop.
    pub upump_mgr: UpumpMgr,
    events: Uqueue<XferEventMsg>,
    id: u64,
}

impl XferCtx {
    /// A probe forwarding the remote pipe's events to the proxy's chain
    /// on the local loop. Builders put it at the head of the real pipe's
    /// chain (optionally stacked over remote-local probes in `next`).
    pub fn event_probe(&self, next: Option<UprobeRef>) -> UprobeRef {
        Rc::new(UprobeXfer {
            id: self.id,
            events: self.events.clone(),
            next,
        })
    }
}

/// Remote-side probe marshalling events into the reverse queue.
struct UprobeXfer {
    id: u64,
    events: Uqueue<XferEventMsg>,
    next: Option<UprobeRef>,
}

impl UprobeXfer {
    fn forward(&self, event: XferEvent) {
        // The reverse queue is sized for bursts; overflow drops the event
        // with a note rather than blocking the remote loop.
        if self.events.push((self.id, event)).is_err() {
            log::warn!("transfer event queue full, event dropped");
        }
    }
}

impl Uprobe for UprobeXfer {
    fn catch(&self, ident: &PipeIdent, event: &mut Event<'_>) -> Result<()> {
        match event {
            Event::Log { level, msg } => {
                self.forward(XferEvent::Log(*level, (*msg).to_owned()));
                Ok(())
            }
            Event::Error(err) => {
                self.forward(XferEvent::Error(*err));
                Ok(())
            }
            Event::NewFlowDef(flow_def) => {
                self.forward(XferEvent::NewFlowDef(flow_def.dup()));
                Ok(())
            }
            Event::SourceEnd => {
                self.forward(XferEvent::SourceEnd);
                Ok(())
            }
            Event::SinkEnd => {
                self.forward(XferEvent::SinkEnd);
                Ok(())
            }
            _ => throw_next(self.next.as_ref(), ident, event),
        }
    }
}

// ---------------------------------------------------------------------------
// Remote side
// ---------------------------------------------------------------------------

fn apply_remote(pipe: &UpipeRef, cmd: XferCmd, remote: &UpumpMgr) {
    let result = match cmd {
        XferCmd::SetFlowDef(flow_def) => pipe.set_flow_def(&flow_def),
        XferCmd::SetOption { name, value } => pipe.set_option(&name, &value),
        XferCmd::AttachUpumpMgr => pipe.attach_upump_mgr(remote.clone()),
        XferCmd::SetMaxLength(max) => pipe.set_max_length(max),
        XferCmd::SetOutputSize(size) => {
            pipe.do_control(&mut PipeCmd::SetOutputSize(size))
        }
    };
    if let Err(err) = result {
        log::warn!("remote pipe refused marshalled command: {err}");
    }
}

/// Install the transfer receiver on the *remote* loop. Must be called on
/// the remote loop's thread. Returns the `Send` manager handle to ship
/// to other threads, plus the receiver pump (started) that must stay
/// alive as long as proxies exist.
pub fn xfer_remote(remote: &UpumpMgr, depth: usize) -> Result<(XferMgr, Upump)> {
    let pipes: Rc<RefCell<HashMap<u64, UpipeRef>>> = Rc::new(RefCell::new(HashMap::new()));
    let remote_mgr = remote.clone();

    let handler_pipes = Rc::clone(&pipes);
    let (queue, pump) = uqueue::<XferMsg>(remote, depth, move |msg| match msg {
        XferMsg::Attach { id, events, build } => {
            let ctx = XferCtx {
                upump_mgr: remote_mgr.clone(),
                events,
                id,
            };
            match build(&ctx) {
                Ok(pipe) => {
                    handler_pipes.borrow_mut().insert(id, pipe);
                }
                Err(err) => log::warn!("remote pipe build failed: {err}"),
            }
        }
        XferMsg::Input { id, uref } => {
            let pipe = handler_pipes.borrow().get(&id).cloned();
            match pipe {
                Some(pipe) => pipe.send(uref, None),
                None => log::warn!("input for unknown transfer slot {id}"),
            }
        }
        XferMsg::Control { id, cmd } => {
            let pipe = handler_pipes.borrow().get(&id).cloned();
            match pipe {
                Some(pipe) => apply_remote(&pipe, cmd, &remote_mgr),
                None => log::warn!("control for unknown transfer slot {id}"),
            }
        }
        XferMsg::Detach { id } => {
            handler_pipes.borrow_mut().remove(&id);
        }
    })?;
    pump.start();

    Ok((
        XferMgr {
            queue,
            next_id: Arc::new(AtomicU64::new(0)),
        },
        pump,
    ))
}

/// `Send` handle to a remote loop's transfer receiver.
#[derive(Clone)]
pub struct XferMgr {
    queue: Uqueue<XferMsg>,
    next_id: Arc<AtomicU64>,
}

impl XferMgr {
    /// Bind the manager to the local loop: creates the reverse event
    /// queue whose consumer re-throws remote events at proxy probes.
    pub fn bind(self, local: &UpumpMgr, event_depth: usize) -> Result<XferLocal> {
        let probes: Rc<RefCell<HashMap<u64, (PipeIdent, UprobeRef)>>> =
            Rc::new(RefCell::new(HashMap::new()));

        let dispatch_probes = Rc::clone(&probes);
        let (events, events_pump) =
            uqueue::<XferEventMsg>(local, event_depth, move |(id, event)| {
                let entry = dispatch_probes.borrow().get(&id).cloned();
                let Some((ident, probe)) = entry else {
                    return;
                };
                let result = match event {
                    XferEvent::Log(level, msg) => {
                        throw(&probe, &ident, &mut Event::Log { level, msg: &msg })
                    }
                    XferEvent::Error(err) => throw(&probe, &ident, &mut Event::Error(err)),
                    XferEvent::NewFlowDef(flow_def) => {
                        throw(&probe, &ident, &mut Event::NewFlowDef(&flow_def))
                    }
                    XferEvent::SourceEnd => throw(&probe, &ident, &mut Event::SourceEnd),
                    XferEvent::SinkEnd => throw(&probe, &ident, &mut Event::SinkEnd),
                };
                let _ = result;
            })?;
        events_pump.start();

        Ok(XferLocal {
            mgr: self,
            events,
            _events_pump: events_pump,
            probes,
        })
    }
}

/// Local binding of a transfer manager.
pub struct XferLocal {
    mgr: XferMgr,
    events: Uqueue<XferEventMsg>,
    _events_pump: Upump,
    probes: Rc<RefCell<HashMap<u64, (PipeIdent, UprobeRef)>>>,
}

impl XferLocal {
    /// Allocate a proxy whose real pipe is built by `build` on the
    /// remote loop. `probe` is the local chain that receives the remote
    /// pipe's events.
    pub fn alloc_pipe(
        &self,
        probe: UprobeRef,
        name: impl Into<String>,
        build: impl FnOnce(&XferCtx) -> Result<UpipeRef> + Send + 'static,
    ) -> Result<Rc<RefCell<XferPipe>>> {
        let id = self.mgr.next_id.fetch_add(1, Ordering::Relaxed);
        let mut core = PipeCore::new(name, XFER_SIGNATURE, Rc::clone(&probe));
        self.probes
            .borrow_mut()
            .insert(id, (core.ident().clone(), probe));

        if self
            .mgr
            .queue
            .push(XferMsg::Attach {
                id,
                events: self.events.clone(),
                build: Box::new(build),
            })
            .is_err()
        {
            self.probes.borrow_mut().remove(&id);
            return Err(Error::Busy);
        }

        core.throw_ready();
        Ok(Rc::new(RefCell::new(XferPipe {
            core,
            queue: self.mgr.queue.clone(),
            id,
            held: InputHelper::new(),
            probes: Rc::clone(&self.probes),
        })))
    }

    /// Install the trigger fired on the remote thread once envelopes have
    /// been drained; wire it to a local pump that flushes held input.
    pub fn set_space_trigger(&self, trigger: crate::upump::UpumpTrigger) {
        self.mgr.queue.set_space_trigger(trigger);
    }
}

// ---------------------------------------------------------------------------
// Local proxy pipe
// ---------------------------------------------------------------------------

/// Local proxy for a pipe living on another loop.
pub struct XferPipe {
    core: PipeCore,
    queue: Uqueue<XferMsg>,
    id: u64,
    held: InputHelper,
    probes: Rc<RefCell<HashMap<u64, (PipeIdent, UprobeRef)>>>,
}

impl XferPipe {
    /// Push held envelopes, then `uref`. On overflow the unit is held
    /// and the producing pump blocked.
    fn push_input(&mut self, uref: Uref, upump: Option<&Upump>) {
        if !self.flush() {
            self.held.hold(uref, upump);
            return;
        }
        match self.queue.push(XferMsg::Input { id: self.id, uref }) {
            Ok(()) => {}
            Err(UqueuePushError::Full(XferMsg::Input { uref, .. })) => {
                self.held.hold(uref, upump);
                if let Some(upump) = upump {
                    if self.held.blocked() == 0 {
                        self.held.block(upump);
                    }
                }
            }
            Err(_) => {
                self.core.throw_error(Error::Invalid);
            }
        }
    }

    /// Drain held units into the queue. Returns true when nothing is
    /// held any more.
    pub fn flush(&mut self) -> bool {
        let queue = self.queue.clone();
        let id = self.id;
        self.held.drain(|uref| {
            match queue.push(XferMsg::Input { id, uref }) {
                Ok(()) => Ok(()),
                Err(UqueuePushError::Full(XferMsg::Input { uref, .. }))
                | Err(UqueuePushError::Closed(XferMsg::Input { uref, .. })) => Err(uref),
                Err(_) => unreachable!("input envelopes bounce as inputs"),
            }
        })
    }

    fn push_control(&mut self, cmd: XferCmd) -> Result<()> {
        self.queue
            .push(XferMsg::Control { id: self.id, cmd })
            .map_err(|_| Error::Busy)
    }
}

impl Upipe for XferPipe {
    fn input(&mut self, uref: Uref, upump: Option<&Upump>) {
        self.push_input(uref, upump);
    }

    fn control(&mut self, cmd: &mut PipeCmd<'_>) -> Result<()> {
        match cmd {
            PipeCmd::SetFlowDef(flow_def) => self.push_control(XferCmd::SetFlowDef(flow_def.dup())),
            PipeCmd::SetOption { name, value } => self.push_control(XferCmd::SetOption {
                name: (*name).to_owned(),
                value: (*value).to_owned(),
            }),
            PipeCmd::AttachUpumpMgr(_) => self.push_control(XferCmd::AttachUpumpMgr),
            PipeCmd::SetMaxLength(max) => {
                let max = *max;
                self.held.set_max_length(max);
                self.push_control(XferCmd::SetMaxLength(max))
            }
            PipeCmd::SetOutputSize(size) => self.push_control(XferCmd::SetOutputSize(*size)),
            _ => Err(Error::Unhandled),
        }
    }
}

impl Drop for XferPipe {
    fn drop(&mut self) {
        // Flush what we can, then tear down the remote slot. Remaining
        // held units are discarded with the proxy.
        let _ = self.flush();
        let _ = self.queue.push(XferMsg::Detach { id: self.id });
        self.probes.borrow_mut().remove(&self.id);
        self.core.throw_dead();
    }
}
