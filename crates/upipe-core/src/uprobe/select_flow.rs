//! Probe filtering flow-definition change events.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::Result;

use super::{Event, PipeIdent, Uprobe, UprobeRef, throw_next};

/// Suppresses `new-flow-def` events whose definition string does not
/// start with the configured filter; matching events (and everything
/// else) are delegated. The filter can be changed at runtime.
pub struct UprobeSelectFlow {
    next: Option<UprobeRef>,
    filter: RefCell<String>,
}

impl UprobeSelectFlow {
    pub fn new(next: Option<UprobeRef>, filter: impl Into<String>) -> Rc<Self> {
        Rc::new(Self {
            next,
            filter: RefCell::new(filter.into()),
        })
    }

    /// Replace the filter prefix.
    pub fn set_filter(&self, filter: impl Into<String>) {
        *self.filter.borrow_mut() = filter.into();
    }
}

impl Uprobe for UprobeSelectFlow {
    fn catch(&self, ident: &PipeIdent, event: &mut Event<'_>) -> Result<()> {
        if let Event::NewFlowDef(flow_def) = event {
            if !flow_def.flow_def_matches(&self.filter.borrow()) {
                // Swallowed: downstream observers never see this flow.
                return Ok(());
            }
        }
        throw_next(self.next.as_ref(), ident, event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::udict::UdictMgr;
    use crate::uprobe::test_util::UprobeRecorder;
    use crate::uprobe::throw;
    use crate::uref::UrefMgr;

    #[test]
    fn test_only_matching_flows_pass() {
        let (tail, seen) = UprobeRecorder::new(None);
        let probe: UprobeRef = UprobeSelectFlow::new(Some(tail), "sound.");
        let ident = PipeIdent::new("split", 0);
        let uref_mgr = UrefMgr::new(UdictMgr::new(2));

        let video = uref_mgr.alloc_flow("pic.h264.");
        let audio = uref_mgr.alloc_flow("sound.s16.");

        assert!(throw(&probe, &ident, &mut Event::NewFlowDef(&video)).is_ok());
        assert!(seen.borrow().is_empty(), "non-matching flow suppressed");

        let _ = throw(&probe, &ident, &mut Event::NewFlowDef(&audio));
        assert_eq!(seen.borrow().as_slice(), ["new flow def"]);
    }

    #[test]
    fn test_filter_can_change() {
        let (tail, seen) = UprobeRecorder::new(None);
        let probe = UprobeSelectFlow::new(Some(tail), "sound.");
        let probe_ref: UprobeRef = Rc::clone(&probe) as UprobeRef;
        let ident = PipeIdent::new("split", 0);
        let uref_mgr = UrefMgr::new(UdictMgr::new(2));
        let video = uref_mgr.alloc_flow("pic.h264.");

        let _ = throw(&probe_ref, &ident, &mut Event::NewFlowDef(&video));
        assert!(seen.borrow().is_empty());

        probe.set_filter("pic.");
        let _ = throw(&probe_ref, &ident, &mut Event::NewFlowDef(&video));
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn test_other_events_untouched() {
        let (tail, seen) = UprobeRecorder::new(None);
        let probe: UprobeRef = UprobeSelectFlow::new(Some(tail), "sound.");
        let ident = PipeIdent::new("split", 0);
        let _ = throw(&probe, &ident, &mut Event::SyncAcquired);
        assert_eq!(seen.borrow().as_slice(), ["sync acquired"]);
    }
}
