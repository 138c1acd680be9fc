//! Deferred resource requests travelling the pipe chain.
//!
//! A pipe that needs a resource (a uref manager, a ubuf manager matching a
//! flow format, a clock, an event loop, a negotiated flow format, the
//! sink's latency) registers a request downstream. Whichever component can
//! provide the resource answers asynchronously through the request's
//! callback; the provider keeps its own reference to the resource.
//!
//! Requests are loop-local (`Rc`-based); identity is pointer identity, so
//! `register`/`unregister` pairs hand the same handle around.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::ubuf::UbufMgr;
use crate::uclock::UclockRef;
use crate::upump::UpumpMgr;
use crate::uref::{Uref, UrefMgr};

/// What is being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    UrefMgr,
    UbufMgr,
    Uclock,
    UpumpMgr,
    FlowFormat,
    SinkLatency,
}

/// A provider's answer.
#[derive(Clone)]
pub enum RequestAnswer {
    UrefMgr(Arc<UrefMgr>),
    /// The provided manager, plus the (possibly amended) flow format it
    /// was built for.
    UbufMgr(UbufMgr, Option<Rc<Uref>>),
    Uclock(UclockRef),
    UpumpMgr(UpumpMgr),
    FlowFormat(Rc<Uref>),
    /// Aggregate downstream latency in 27 MHz ticks.
    SinkLatency(u64),
}

impl std::fmt::Debug for RequestAnswer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RequestAnswer::UrefMgr(_) => "UrefMgr",
            RequestAnswer::UbufMgr(..) => "UbufMgr",
            RequestAnswer::Uclock(_) => "Uclock",
            RequestAnswer::UpumpMgr(_) => "UpumpMgr",
            RequestAnswer::FlowFormat(_) => "FlowFormat",
            RequestAnswer::SinkLatency(_) => "SinkLatency",
        };
        f.write_str(name)
    }
}

type AnswerCb = RefCell<Box<dyn FnMut(RequestAnswer)>>;

/// A registered resource request.
pub struct Urequest {
    kind: RequestKind,
    /// Flow format the request is about (ubuf-mgr and flow-format kinds).
    flow_def: Option<Uref>,
    answer_cb: AnswerCb,
}

/// Shared request handle; identity is pointer identity.
pub type UrequestRef = Rc<Urequest>;

impl Urequest {
    /// Build a request. `answer_cb` runs every time a provider answers
    /// (providers may answer again when their resource changes).
    pub fn new(
        kind: RequestKind,
        flow_def: Option<Uref>,
        answer_cb: impl FnMut(RequestAnswer) + 'static,
    ) -> UrequestRef {
        Rc::new(Self {
            kind,
            flow_def,
            answer_cb: RefCell::new(Box::new(answer_cb)),
        })
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// The flow format this request negotiates, if any.
    pub fn flow_def(&self) -> Option<&Uref> {
        self.flow_def.as_ref()
    }

    /// Deliver an answer to the requester.
    pub fn answer(&self, answer: RequestAnswer) {
        (self.answer_cb.borrow_mut())(answer);
    }
}

impl std::fmt::Debug for Urequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Urequest").field("kind", &self.kind).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::udict::UdictMgr;

    #[test]
    fn test_answer_reaches_callback() {
        let got = Rc::new(RefCell::new(None));
        let request = {
            let got = Rc::clone(&got);
            Urequest::new(RequestKind::SinkLatency, None, move |ans| {
                *got.borrow_mut() = Some(ans);
            })
        };
        request.answer(RequestAnswer::SinkLatency(27_000));
        match got.borrow().as_ref() {
            Some(RequestAnswer::SinkLatency(v)) => assert_eq!(*v, 27_000),
            other => panic!("unexpected answer {other:?}"),
        }
    }

    #[test]
    fn test_identity_is_pointer_identity() {
        let a = Urequest::new(RequestKind::Uclock, None, |_| {});
        let b = Urequest::new(RequestKind::Uclock, None, |_| {});
        assert!(Rc::ptr_eq(&a, &a.clone()));
        assert!(!Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_flow_def_carried() {
        let mgr = UrefMgr::new(UdictMgr::new(2));
        let request = Urequest::new(
            RequestKind::UbufMgr,
            Some(mgr.alloc_flow("pic.")),
            |_| {},
        );
        assert_eq!(request.flow_def().unwrap().flow_def(), Some("pic."));
        assert_eq!(request.kind(), RequestKind::UbufMgr);
    }
}
