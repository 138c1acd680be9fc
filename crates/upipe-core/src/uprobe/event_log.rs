//! Fall-back probe tracing every event that reaches it.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use crate::error::Result;

use super::{Event, LogLevel, PipeIdent, Uprobe, UprobeRef, throw_next};

/// Describes each caught event as a log event at a fixed level, then
/// delegates the original event unchanged. Individual event labels can be
/// masked. Clock events are masked by default (they fire per unit).
pub struct UprobeEventLog {
    next: Option<UprobeRef>,
    level: LogLevel,
    masked: RefCell<HashSet<&'static str>>,
}

impl UprobeEventLog {
    pub fn new(next: Option<UprobeRef>, level: LogLevel) -> Rc<Self> {
        let mut masked = HashSet::new();
        masked.insert("clock ref");
        masked.insert("clock ts");
        masked.insert("log");
        Rc::new(Self {
            next,
            level,
            masked: RefCell::new(masked),
        })
    }

    /// Stop tracing events with this label.
    pub fn mask(&self, label: &'static str) {
        self.masked.borrow_mut().insert(label);
    }

    /// Resume tracing events with this label.
    pub fn unmask(&self, label: &'static str) {
        self.masked.borrow_mut().remove(label);
    }

    fn describe(&self, event: &Event<'_>) -> Option<String> {
        if self.masked.borrow().contains(event.label()) {
            return None;
        }
        Some(match event {
            Event::NewFlowDef(flow_def) => format!(
                "probe caught new flow def \"{}\"",
                flow_def.flow_def().unwrap_or("[invalid]")
            ),
            Event::Error(err) => format!("probe caught error: {err}"),
            Event::ClockRef { cr, discontinuity } if *discontinuity => {
                format!("probe caught new clock ref {cr} (discontinuity)")
            }
            Event::ClockRef { cr, .. } => format!("probe caught new clock ref {cr}"),
            other => format!("probe caught {} event", other.label()),
        })
    }
}

impl Uprobe for UprobeEventLog {
    fn catch(&self, ident: &PipeIdent, event: &mut Event<'_>) -> Result<()> {
        if let Some(msg) = self.describe(event) {
            let _ = throw_next(
                self.next.as_ref(),
                ident,
                &mut Event::Log {
                    level: self.level,
                    msg: &msg,
                },
            );
        }
        throw_next(self.next.as_ref(), ident, event)
    }
}
