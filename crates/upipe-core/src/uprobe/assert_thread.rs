//! Probe asserting events arrive on the expected thread.

use std::rc::Rc;
use std::thread::ThreadId;

use crate::error::{Error, Result};

use super::{Event, PipeIdent, Uprobe, UprobeRef, throw_next};

/// Verifies that every event is thrown on the thread this probe was
/// created on. A violation means a pipe is being driven from the wrong
/// loop. Debug builds assert; release builds log and answer `Invalid`.
pub struct UprobeAssertThread {
    next: Option<UprobeRef>,
    thread: ThreadId,
}

impl UprobeAssertThread {
    pub fn new(next: Option<UprobeRef>) -> Rc<Self> {
        Rc::new(Self {
            next,
            thread: std::thread::current().id(),
        })
    }
}

impl Uprobe for UprobeAssertThread {
    fn catch(&self, ident: &PipeIdent, event: &mut Event<'_>) -> Result<()> {
        let current = std::thread::current().id();
        if current != self.thread {
            debug_assert_eq!(
                current, self.thread,
                "event {} from pipe {ident} on the wrong thread",
                event.label()
            );
            log::error!(
                "pipe {ident}: event \"{}\" thrown on {current:?}, expected {:?}",
                event.label(),
                self.thread
            );
            return Err(Error::Invalid);
        }
        throw_next(self.next.as_ref(), ident, event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uprobe::test_util::UprobeRecorder;
    use crate::uprobe::throw;

    #[test]
    fn test_same_thread_passes() {
        let (tail, seen) = UprobeRecorder::new(None);
        let probe: UprobeRef = UprobeAssertThread::new(Some(tail));
        let ident = PipeIdent::new("x", 0);
        let _ = throw(&probe, &ident, &mut Event::Ready);
        assert_eq!(seen.borrow().as_slice(), ["ready"]);
    }
}
