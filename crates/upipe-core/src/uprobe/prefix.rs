//! Probe prepending a name to log messages.

use std::rc::Rc;

use crate::error::Result;

use super::{Event, PipeIdent, Uprobe, UprobeRef, throw_next};

/// Prefixes every log message with a fixed name and delegates. Useful to
/// tell apart several instances of the same module in one chain.
pub struct UprobePrefix {
    next: Option<UprobeRef>,
    name: String,
}

impl UprobePrefix {
    pub fn new(next: Option<UprobeRef>, name: impl Into<String>) -> Rc<Self> {
        Rc::new(Self {
            next,
            name: name.into(),
        })
    }
}

impl Uprobe for UprobePrefix {
    fn catch(&self, ident: &PipeIdent, event: &mut Event<'_>) -> Result<()> {
        if let Event::Log { level, msg } = event {
            let prefixed = format!("{}: {}", self.name, msg);
            return throw_next(
                self.next.as_ref(),
                ident,
                &mut Event::Log {
                    level: *level,
                    msg: &prefixed,
                },
            );
        }
        throw_next(self.next.as_ref(), ident, event)
    }
}
