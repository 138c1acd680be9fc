//! Pipes: the stages of a processing graph.
//!
//! A pipe consumes data units through [`Upipe::input`], answers a closed
//! set of control commands through [`Upipe::control`], and raises events
//! to the probe chain it was allocated with. Pipe managers are factories
//! tagged with a module signature; module-specific commands and events
//! are guarded by that signature.
//!
//! Pipes are loop-local: handles are `Rc<RefCell<_>>` and never cross
//! threads (cross-thread work goes through the transfer machinery).

pub mod helpers;

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::uclock::UclockRef;
use crate::upump::{Upump, UpumpMgr};
use crate::uref::Uref;
use crate::urequest::UrequestRef;

pub use crate::uprobe::PipeIdent;

/// A stage in a processing graph.
pub trait Upipe {
    /// Feed one data unit. `upump` is the pump that produced it, if any;
    /// a pipe that must delay takes a blocker on it to push back.
    fn input(&mut self, uref: Uref, upump: Option<&Upump>);

    /// Handle a control command.
    fn control(&mut self, cmd: &mut PipeCmd<'_>) -> Result<()>;
}

/// Shared pipe handle.
pub type UpipeRef = Rc<RefCell<dyn Upipe>>;

/// Closed set of control commands, plus a signature-guarded escape hatch.
pub enum PipeCmd<'a> {
    /// Attach the event loop the pipe should allocate pumps on.
    AttachUpumpMgr(UpumpMgr),
    /// Attach a clock.
    AttachUclock(UclockRef),
    /// Propose an input flow definition. The pipe either accepts (and
    /// re-derives its output flow) or answers `Invalid`, leaving its
    /// state untouched.
    SetFlowDef(&'a Uref),
    /// Read back the current flow definition (a duplicate).
    GetFlowDef(&'a mut Option<Uref>),
    /// Link the downstream pipe.
    SetOutput(Option<UpipeRef>),
    /// Read back the downstream pipe.
    GetOutput(&'a mut Option<UpipeRef>),
    /// Register a resource request to be answered by this pipe or
    /// forwarded along the chain.
    RegisterRequest(UrequestRef),
    /// Withdraw a previously registered request.
    UnregisterRequest(UrequestRef),
    /// Module-local string option.
    SetOption { name: &'a str, value: &'a str },
    /// Bound the input hold queue.
    SetMaxLength(usize),
    GetMaxLength(&'a mut Option<usize>),
    /// Preferred output payload size (sources and framers).
    SetOutputSize(usize),
    GetOutputSize(&'a mut Option<usize>),
    /// Access the sub-pipe manager of a join/split pipe.
    GetSubMgr(&'a mut Option<Rc<dyn UpipeMgr>>),
    /// Module-specific command, guarded by the module signature.
    Custom {
        signature: u32,
        cmd: &'a mut dyn Any,
    },
}

impl PipeCmd<'_> {
    /// Short label for diagnostics.
    pub fn label(&self) -> &'static str {
        match self {
            PipeCmd::AttachUpumpMgr(_) => "attach upump mgr",
            PipeCmd::AttachUclock(_) => "attach uclock",
            PipeCmd::SetFlowDef(_) => "set flow def",
            PipeCmd::GetFlowDef(_) => "get flow def",
            PipeCmd::SetOutput(_) => "set output",
            PipeCmd::GetOutput(_) => "get output",
            PipeCmd::RegisterRequest(_) => "register request",
            PipeCmd::UnregisterRequest(_) => "unregister request",
            PipeCmd::SetOption { .. } => "set option",
            PipeCmd::SetMaxLength(_) => "set max length",
            PipeCmd::GetMaxLength(_) => "get max length",
            PipeCmd::SetOutputSize(_) => "set output size",
            PipeCmd::GetOutputSize(_) => "get output size",
            PipeCmd::GetSubMgr(_) => "get sub mgr",
            PipeCmd::Custom { .. } => "custom",
        }
    }
}

impl std::fmt::Debug for PipeCmd<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Manager-level commands.
pub enum MgrCmd<'a> {
    /// Drop every cached structure the manager's pools hold.
    Vacuum,
    /// Module-specific command, guarded by the module signature.
    Custom {
        signature: u32,
        cmd: &'a mut dyn Any,
    },
}

/// Arguments to pipe allocation.
pub enum AllocArgs {
    /// No argument.
    Void,
    /// An input or output flow definition, for pipes parameterised by one.
    Flow(Uref),
}

/// A pipe factory. Managers are immutable once in use and identified by
/// their module signature.
pub trait UpipeMgr {
    /// Module signature, unique per pipe implementation.
    fn signature(&self) -> u32;

    /// Allocate a pipe. Takes ownership of the probe chain head; on
    /// success the new pipe has thrown `ready`.
    fn alloc(&self, probe: crate::uprobe::UprobeRef, args: AllocArgs) -> Result<UpipeRef>;

    /// Manager-level control.
    fn mgr_control(&self, _cmd: &mut MgrCmd<'_>) -> Result<()> {
        Err(Error::Unhandled)
    }
}

// ---------------------------------------------------------------------------
// Control convenience
// ---------------------------------------------------------------------------

/// Ergonomic wrappers over [`Upipe::control`] for pipe handles.
pub trait UpipeControl {
    fn do_control(&self, cmd: &mut PipeCmd<'_>) -> Result<()>;

    fn attach_upump_mgr(&self, mgr: UpumpMgr) -> Result<()> {
        self.do_control(&mut PipeCmd::AttachUpumpMgr(mgr))
    }

    fn attach_uclock(&self, uclock: UclockRef) -> Result<()> {
        self.do_control(&mut PipeCmd::AttachUclock(uclock))
    }

    fn set_flow_def(&self, flow_def: &Uref) -> Result<()> {
        self.do_control(&mut PipeCmd::SetFlowDef(flow_def))
    }

    fn get_flow_def(&self) -> Result<Option<Uref>> {
        let mut slot = None;
        self.do_control(&mut PipeCmd::GetFlowDef(&mut slot))?;
        Ok(slot)
    }

    fn set_output(&self, output: Option<UpipeRef>) -> Result<()> {
        self.do_control(&mut PipeCmd::SetOutput(output))
    }

    fn get_output(&self) -> Result<Option<UpipeRef>> {
        let mut slot = None;
        self.do_control(&mut PipeCmd::GetOutput(&mut slot))?;
        Ok(slot)
    }

    fn register_request(&self, request: UrequestRef) -> Result<()> {
        self.do_control(&mut PipeCmd::RegisterRequest(request))
    }

    fn unregister_request(&self, request: UrequestRef) -> Result<()> {
        self.do_control(&mut PipeCmd::UnregisterRequest(request))
    }

    fn set_option(&self, name: &str, value: &str) -> Result<()> {
        self.do_control(&mut PipeCmd::SetOption { name, value })
    }

    fn set_max_length(&self, max: usize) -> Result<()> {
        self.do_control(&mut PipeCmd::SetMaxLength(max))
    }

    fn get_sub_mgr(&self) -> Result<Option<Rc<dyn UpipeMgr>>> {
        let mut slot = None;
        self.do_control(&mut PipeCmd::GetSubMgr(&mut slot))?;
        Ok(slot)
    }

    /// Feed a data unit through the handle.
    fn send(&self, uref: Uref, upump: Option<&Upump>);
}

impl UpipeControl for UpipeRef {
    fn do_control(&self, cmd: &mut PipeCmd<'_>) -> Result<()> {
        self.borrow_mut().control(cmd)
    }

    fn send(&self, uref: Uref, upump: Option<&Upump>) {
        self.borrow_mut().input(uref, upump);
    }
}

#[cfg(test)]
mod tests {
    use super::helpers::PipeCore;
    use super::*;
    use crate::udict::UdictMgr;
    use crate::uprobe::test_util::UprobeRecorder;
    use crate::uref::UrefMgr;

    /// Minimal pipe accepting any `void.` flow and counting inputs.
    struct NullPipe {
        core: PipeCore,
        flow_def: Option<Uref>,
        received: Rc<std::cell::Cell<usize>>,
    }

    #[derive(Default)]
    struct NullMgr {
        received: Rc<std::cell::Cell<usize>>,
    }

    impl UpipeMgr for NullMgr {
        fn signature(&self) -> u32 {
            0x6e756c6c // "null"
        }

        fn alloc(&self, probe: crate::uprobe::UprobeRef, _args: AllocArgs) -> Result<UpipeRef> {
            let mut core = PipeCore::new("null", self.signature(), probe);
            core.throw_ready();
            Ok(Rc::new(RefCell::new(NullPipe {
                core,
                flow_def: None,
                received: Rc::clone(&self.received),
            })))
        }
    }

    impl Upipe for NullPipe {
        fn input(&mut self, _uref: Uref, _upump: Option<&Upump>) {
            self.received.set(self.received.get() + 1);
        }

        fn control(&mut self, cmd: &mut PipeCmd<'_>) -> Result<()> {
            match cmd {
                PipeCmd::SetFlowDef(flow_def) => {
                    if !flow_def.flow_def_matches("void.") {
                        return Err(Error::Invalid);
                    }
                    self.flow_def = Some(flow_def.dup());
                    Ok(())
                }
                PipeCmd::GetFlowDef(slot) => {
                    **slot = self.flow_def.as_ref().map(Uref::dup);
                    Ok(())
                }
                _ => Err(Error::Unhandled),
            }
        }
    }

    impl Drop for NullPipe {
        fn drop(&mut self) {
            self.core.throw_dead();
        }
    }

    #[test]
    fn test_lifecycle_events() {
        let (probe, seen) = UprobeRecorder::new(None);
        let pipe = NullMgr::default().alloc(probe, AllocArgs::Void).unwrap();
        assert_eq!(seen.borrow().as_slice(), ["ready"]);
        drop(pipe);
        assert_eq!(seen.borrow().as_slice(), ["ready", "dead"]);
    }

    #[test]
    fn test_flow_def_gate_and_idempotence() {
        let (probe, _) = UprobeRecorder::new(None);
        let pipe = NullMgr::default().alloc(probe, AllocArgs::Void).unwrap();
        let uref_mgr = UrefMgr::new(UdictMgr::new(2));

        let bad = uref_mgr.alloc_flow("pic.");
        assert_eq!(pipe.set_flow_def(&bad), Err(Error::Invalid));
        assert!(pipe.get_flow_def().unwrap().is_none(), "state untouched");

        let good = uref_mgr.alloc_flow("void.");
        pipe.set_flow_def(&good).unwrap();
        let stored = pipe.get_flow_def().unwrap().unwrap();
        // set-flow-def(get-flow-def()) is a no-op returning ok.
        pipe.set_flow_def(&stored).unwrap();
        assert_eq!(
            pipe.get_flow_def().unwrap().unwrap().flow_def(),
            Some("void.")
        );
    }

    #[test]
    fn test_unknown_command_is_unhandled() {
        let (probe, _) = UprobeRecorder::new(None);
        let pipe = NullMgr::default().alloc(probe, AllocArgs::Void).unwrap();
        assert_eq!(pipe.set_max_length(4), Err(Error::Unhandled));
    }

    #[test]
    fn test_input_through_handle() {
        let (probe, _) = UprobeRecorder::new(None);
        let mgr = NullMgr::default();
        let pipe = mgr.alloc(probe, AllocArgs::Void).unwrap();
        let uref_mgr = UrefMgr::new(UdictMgr::new(2));
        pipe.send(uref_mgr.alloc(), None);
        pipe.send(uref_mgr.alloc(), None);
        assert_eq!(mgr.received.get(), 2);
    }

    // -----------------------------------------------------------------------
    // Sub-pipes
    // -----------------------------------------------------------------------

    use super::helpers::SubPipeHelper;
    use std::rc::Weak;

    /// Split fixture: children represent per-stream outputs and keep the
    /// parent alive while they exist.
    struct Split {
        core: PipeCore,
        weak: Weak<RefCell<Split>>,
        subs: SubPipeHelper,
    }

    struct SplitMgr;

    impl UpipeMgr for SplitMgr {
        fn signature(&self) -> u32 {
            0x73706c74 // "splt"
        }

        fn alloc(&self, probe: crate::uprobe::UprobeRef, _args: AllocArgs) -> Result<UpipeRef> {
            Ok(Rc::new_cyclic(|weak| {
                let mut core = PipeCore::new("split", self.signature(), probe);
                core.throw_ready();
                RefCell::new(Split {
                    core,
                    weak: weak.clone(),
                    subs: SubPipeHelper::new(),
                })
            }))
        }
    }

    impl Upipe for Split {
        fn input(&mut self, _uref: Uref, _upump: Option<&Upump>) {}

        fn control(&mut self, cmd: &mut PipeCmd<'_>) -> Result<()> {
            match cmd {
                PipeCmd::GetSubMgr(slot) => {
                    **slot = Some(Rc::new(SplitSubMgr {
                        parent: self.weak.clone(),
                    }));
                    Ok(())
                }
                PipeCmd::Custom { signature, cmd } if *signature == 0x73706c74 => {
                    match cmd.downcast_mut::<Option<usize>>() {
                        Some(slot) => {
                            *slot = Some(self.subs.len());
                            Ok(())
                        }
                        None => Err(Error::Invalid),
                    }
                }
                _ => Err(Error::Unhandled),
            }
        }
    }

    impl Drop for Split {
        fn drop(&mut self) {
            self.core.throw_dead();
        }
    }

    struct SplitSubMgr {
        parent: Weak<RefCell<Split>>,
    }

    struct SplitSub {
        core: PipeCore,
        /// Strong handle: the parent outlives every child.
        _parent: Rc<RefCell<Split>>,
    }

    impl UpipeMgr for SplitSubMgr {
        fn signature(&self) -> u32 {
            0x73756273 // "subs"
        }

        fn alloc(&self, probe: crate::uprobe::UprobeRef, _args: AllocArgs) -> Result<UpipeRef> {
            let parent = self.parent.upgrade().ok_or(Error::Invalid)?;
            let mut core = PipeCore::new("split sub", self.signature(), probe);
            core.throw_ready();
            let child: UpipeRef = Rc::new(RefCell::new(SplitSub {
                core,
                _parent: Rc::clone(&parent),
            }));
            parent.borrow_mut().subs.add(&child);
            Ok(child)
        }
    }

    impl Upipe for SplitSub {
        fn input(&mut self, _uref: Uref, _upump: Option<&Upump>) {}

        fn control(&mut self, _cmd: &mut PipeCmd<'_>) -> Result<()> {
            Err(Error::Unhandled)
        }
    }

    impl Drop for SplitSub {
        fn drop(&mut self) {
            self.core.throw_dead();
        }
    }

    #[test]
    fn test_children_keep_parent_alive() {
        let (parent_probe, parent_events) = UprobeRecorder::new(None);
        let parent = SplitMgr.alloc(parent_probe, AllocArgs::Void).unwrap();
        let sub_mgr = parent.get_sub_mgr().unwrap().unwrap();

        let (child_probe, child_events) = UprobeRecorder::new(None);
        let child = sub_mgr.alloc(child_probe, AllocArgs::Void).unwrap();

        // Releasing the external parent handle leaves the family alive.
        drop(parent);
        assert!(
            !parent_events.borrow().iter().any(|e| e == "dead"),
            "parent survives while a child exists"
        );

        // The last child takes the parent down with it.
        drop(child);
        assert_eq!(
            child_events.borrow().as_slice(),
            ["ready", "dead"]
        );
        assert_eq!(
            parent_events.borrow().as_slice(),
            ["ready", "dead"]
        );
    }

    #[test]
    fn test_parent_enumerates_children() {
        let (probe, _) = UprobeRecorder::new(None);
        let parent = SplitMgr.alloc(probe, AllocArgs::Void).unwrap();
        let sub_mgr = parent.get_sub_mgr().unwrap().unwrap();

        let (p1, _) = UprobeRecorder::new(None);
        let (p2, _) = UprobeRecorder::new(None);
        let c1 = sub_mgr.alloc(p1, AllocArgs::Void).unwrap();
        let _c2 = sub_mgr.alloc(p2, AllocArgs::Void).unwrap();

        // Signature-guarded module command: ask the parent for its child
        // count.
        let mut count: Option<usize> = None;
        parent
            .do_control(&mut PipeCmd::Custom {
                signature: 0x73706c74,
                cmd: &mut count,
            })
            .unwrap();
        assert_eq!(count, Some(2));

        drop(c1);
        let mut count: Option<usize> = None;
        parent
            .do_control(&mut PipeCmd::Custom {
                signature: 0x73706c74,
                cmd: &mut count,
            })
            .unwrap();
        assert_eq!(count, Some(1), "dead children are pruned");
    }
}
