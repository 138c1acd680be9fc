//! Flow-def gating and random-access trimming.
//!
//! A trim pipe refuses units until its flow definition is negotiated,
//! then drops everything up to the first random-access unit, throwing
//! `sync-acquired` when the stream becomes decodable.

use std::cell::RefCell;
use std::rc::Rc;

use upipe_core::error::{Error, Result};
use upipe_core::udict::UdictMgr;
use upipe_core::upipe::helpers::{InputHelper, OutputHelper, PipeCore, SyncHelper, expect_void};
use upipe_core::upipe::{AllocArgs, PipeCmd, Upipe, UpipeControl, UpipeMgr, UpipeRef};
use upipe_core::uprobe::UprobeRef;
use upipe_core::upump::Upump;
use upipe_core::uref::{Uref, UrefMgr};

const VTRIM_SIGNATURE: u32 = 0x7674726d;
const EXPECTED_FLOW: &str = "block.mpeg2video.pic.";

struct VideoTrim {
    core: PipeCore,
    output: OutputHelper,
    input: InputHelper,
    sync: SyncHelper,
}

struct VideoTrimMgr;

impl UpipeMgr for VideoTrimMgr {
    fn signature(&self) -> u32 {
        VTRIM_SIGNATURE
    }

    fn alloc(&self, probe: UprobeRef, args: AllocArgs) -> Result<UpipeRef> {
        expect_void(args)?;
        let mut core = PipeCore::new("vtrim", VTRIM_SIGNATURE, probe);
        core.throw_ready();
        Ok(Rc::new(RefCell::new(VideoTrim {
            core,
            output: OutputHelper::new(),
            input: InputHelper::new(),
            sync: SyncHelper::new(),
        })))
    }
}

impl VideoTrim {
    /// Gate one unit. Consumes it (dropping or forwarding); only refuses
    /// while the flow definition is still unknown.
    fn handle(&mut self, uref: Uref) -> std::result::Result<(), Uref> {
        let Self {
            core,
            output,
            sync,
            ..
        } = self;
        if output.flow_def().is_none() {
            return Err(uref);
        }
        if !sync.is_acquired() {
            if !uref.random_access() {
                core.dbg("trimming unit without reference");
                return Ok(());
            }
            sync.acquired(core);
        }
        output.emit(core, uref, None);
        Ok(())
    }

    fn drain(&mut self) {
        // Split borrows: the queue drains through the gate.
        let mut held = std::mem::take(&mut self.input);
        held.drain(|uref| self.handle(uref));
        // Anything refused stays held for the next attempt.
        debug_assert!(self.input.is_empty());
        self.input = held;
    }
}

impl Upipe for VideoTrim {
    fn input(&mut self, uref: Uref, upump: Option<&Upump>) {
        if !self.input.is_empty() {
            self.input.hold(uref, upump);
            self.drain();
            return;
        }
        if let Err(back) = self.handle(uref) {
            self.input.hold(back, upump);
        }
    }

    fn control(&mut self, cmd: &mut PipeCmd<'_>) -> Result<()> {
        match cmd {
            PipeCmd::SetFlowDef(flow_def) => {
                if !flow_def.flow_def_matches(EXPECTED_FLOW) {
                    return Err(Error::Invalid);
                }
                let dup = flow_def.dup();
                let Self { core, output, .. } = self;
                output.store_flow_def(core, dup);
                self.drain();
                Ok(())
            }
            cmd => {
                let result = self.input.control(cmd);
                if !matches!(result, Err(Error::Unhandled)) {
                    return result;
                }
                let Self { core, output, .. } = self;
                output.control(core, cmd)
            }
        }
    }
}

impl Drop for VideoTrim {
    fn drop(&mut self) {
        self.core.throw_dead();
    }
}

/// Sink recording flow ids of delivered units.
struct IdSink {
    seen: Rc<RefCell<Vec<u64>>>,
}

impl Upipe for IdSink {
    fn input(&mut self, uref: Uref, _upump: Option<&Upump>) {
        self.seen.borrow_mut().push(uref.flow_id().unwrap());
    }

    fn control(&mut self, cmd: &mut PipeCmd<'_>) -> Result<()> {
        match cmd {
            PipeCmd::SetFlowDef(_)
            | PipeCmd::RegisterRequest(_)
            | PipeCmd::UnregisterRequest(_) => Ok(()),
            _ => Err(Error::Unhandled),
        }
    }
}

fn unit(uref_mgr: &UrefMgr, id: u64, random_access: bool) -> Uref {
    let mut uref = uref_mgr.alloc();
    uref.set_flow_id(id);
    if random_access {
        uref.set_random_access();
    }
    uref
}

#[test]
fn test_gate_waits_for_random_access() {
    let uref_mgr = UrefMgr::new(UdictMgr::new(8));
    let (probe, seen_events) = upipe_core_recorder();
    let trim = VideoTrimMgr.alloc(probe, AllocArgs::Void).unwrap();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink: UpipeRef = Rc::new(RefCell::new(IdSink {
        seen: Rc::clone(&seen),
    }));
    trim.set_output(Some(sink)).unwrap();

    // Units arriving before negotiation are held, not dropped.
    trim.send(unit(&uref_mgr, 1, false), None);
    trim.send(unit(&uref_mgr, 2, false), None);
    assert!(seen.borrow().is_empty());

    // A wrong flow def is refused and changes nothing.
    let wrong = uref_mgr.alloc_flow("block.aac.");
    assert_eq!(trim.set_flow_def(&wrong), Err(Error::Invalid));
    assert!(trim.get_flow_def().unwrap().is_none());

    // Negotiation releases the held units into the gate; none carries
    // the random-access flag yet, so they are trimmed.
    let flow = uref_mgr.alloc_flow(EXPECTED_FLOW);
    trim.set_flow_def(&flow).unwrap();
    assert!(seen.borrow().is_empty());
    assert!(!seen_events.borrow().iter().any(|e| e == "sync acquired"));

    trim.send(unit(&uref_mgr, 3, true), None);
    trim.send(unit(&uref_mgr, 4, false), None);
    trim.send(unit(&uref_mgr, 5, false), None);

    assert_eq!(
        seen.borrow().as_slice(),
        &[3, 4, 5],
        "first delivered unit is the first random-access unit"
    );
    let syncs = seen_events
        .borrow()
        .iter()
        .filter(|e| *e == "sync acquired")
        .count();
    assert_eq!(syncs, 1);
}

#[test]
fn test_flow_def_idempotence() {
    let uref_mgr = UrefMgr::new(UdictMgr::new(8));
    let (probe, _) = upipe_core_recorder();
    let trim = VideoTrimMgr.alloc(probe, AllocArgs::Void).unwrap();

    let flow = uref_mgr.alloc_flow(EXPECTED_FLOW);
    trim.set_flow_def(&flow).unwrap();
    let current = trim.get_flow_def().unwrap().unwrap();
    trim.set_flow_def(&current).unwrap();
    assert_eq!(
        trim.get_flow_def().unwrap().unwrap().flow_def(),
        Some(EXPECTED_FLOW)
    );
}

/// Minimal recording probe for integration tests.
fn upipe_core_recorder() -> (UprobeRef, Rc<RefCell<Vec<String>>>) {
    struct Recorder {
        seen: Rc<RefCell<Vec<String>>>,
    }
    impl upipe_core::uprobe::Uprobe for Recorder {
        fn catch(
            &self,
            _ident: &upipe_core::uprobe::PipeIdent,
            event: &mut upipe_core::uprobe::Event<'_>,
        ) -> Result<()> {
            self.seen.borrow_mut().push(event.label().to_owned());
            Ok(())
        }
    }
    let seen = Rc::new(RefCell::new(Vec::new()));
    (
        Rc::new(Recorder {
            seen: Rc::clone(&seen),
        }),
        seen,
    )
}
