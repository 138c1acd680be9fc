//! Log-sink probe writing formatted messages to a stream.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use crate::error::Result;

use super::{Event, LogLevel, PipeIdent, Uprobe, UprobeRef, throw_next};

/// Formats pipe log events at or above a minimum level and writes them to
/// any `Write` stream (stderr by default). Log events are consumed;
/// everything else is delegated.
pub struct UprobeStdio {
    next: Option<UprobeRef>,
    min_level: LogLevel,
    out: RefCell<Box<dyn Write>>,
}

impl UprobeStdio {
    /// Log to stderr at `min_level` and above.
    pub fn new(next: Option<UprobeRef>, min_level: LogLevel) -> Rc<Self> {
        Self::with_writer(next, min_level, Box::new(std::io::stderr()))
    }

    /// Log to an arbitrary stream.
    pub fn with_writer(
        next: Option<UprobeRef>,
        min_level: LogLevel,
        out: Box<dyn Write>,
    ) -> Rc<Self> {
        Rc::new(Self {
            next,
            min_level,
            out: RefCell::new(out),
        })
    }
}

impl Uprobe for UprobeStdio {
    fn catch(&self, ident: &PipeIdent, event: &mut Event<'_>) -> Result<()> {
        if let Event::Log { level, msg } = event {
            if *level >= self.min_level {
                let _ = writeln!(self.out.borrow_mut(), "{level}: [{ident}] {msg}");
            }
            return Ok(());
        }
        throw_next(self.next.as_ref(), ident, event)
    }
}
