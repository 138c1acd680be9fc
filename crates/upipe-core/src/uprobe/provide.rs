//! Provider probes answering resource-need events.
//!
//! Each provider caches one resource and answers both the corresponding
//! `need-*` event (filling the answer slot in place) and `provide-request`
//! events of the matching kind. Anything else is delegated.

use std::rc::Rc;
use std::sync::Arc;

use crate::error::Result;
use crate::ubuf::{ChannelDesc, UbufBlockMgr, UbufMgr, UbufPicMgr, UbufSoundMgr};
use crate::uclock::UclockRef;
use crate::umem::UmemMgr;
use crate::upump::UpumpMgr;
use crate::uref::{Uref, UrefMgr};
use crate::urequest::{RequestAnswer, RequestKind};

use super::{Event, PipeIdent, Uprobe, UprobeRef, throw_next};

/// Answers `need-uref-mgr` with a cached manager.
pub struct UprobeUrefMgr {
    next: Option<UprobeRef>,
    uref_mgr: Arc<UrefMgr>,
}

impl UprobeUrefMgr {
    pub fn new(next: Option<UprobeRef>, uref_mgr: Arc<UrefMgr>) -> Rc<Self> {
        Rc::new(Self { next, uref_mgr })
    }
}

impl Uprobe for UprobeUrefMgr {
    fn catch(&self, ident: &PipeIdent, event: &mut Event<'_>) -> Result<()> {
        match event {
            Event::NeedUrefMgr(slot) => {
                **slot = Some(Arc::clone(&self.uref_mgr));
                Ok(())
            }
            Event::ProvideRequest(request) if request.kind() == RequestKind::UrefMgr => {
                request.answer(RequestAnswer::UrefMgr(Arc::clone(&self.uref_mgr)));
                Ok(())
            }
            _ => throw_next(self.next.as_ref(), ident, event),
        }
    }
}

/// Answers `need-uclock` with a cached clock.
pub struct UprobeUclock {
    next: Option<UprobeRef>,
    uclock: UclockRef,
}

impl UprobeUclock {
    pub fn new(next: Option<UprobeRef>, uclock: UclockRef) -> Rc<Self> {
        Rc::new(Self { next, uclock })
    }
}

impl Uprobe for UprobeUclock {
    fn catch(&self, ident: &PipeIdent, event: &mut Event<'_>) -> Result<()> {
        match event {
            Event::NeedUclock(slot) => {
                **slot = Some(Arc::clone(&self.uclock));
                Ok(())
            }
            Event::ProvideRequest(request) if request.kind() == RequestKind::Uclock => {
                request.answer(RequestAnswer::Uclock(Arc::clone(&self.uclock)));
                Ok(())
            }
            _ => throw_next(self.next.as_ref(), ident, event),
        }
    }
}

/// Answers `need-upump-mgr` with the loop this probe was built on.
pub struct UprobeUpumpMgr {
    next: Option<UprobeRef>,
    upump_mgr: UpumpMgr,
}

impl UprobeUpumpMgr {
    pub fn new(next: Option<UprobeRef>, upump_mgr: UpumpMgr) -> Rc<Self> {
        Rc::new(Self { next, upump_mgr })
    }
}

impl Uprobe for UprobeUpumpMgr {
    fn catch(&self, ident: &PipeIdent, event: &mut Event<'_>) -> Result<()> {
        match event {
            Event::NeedUpumpMgr(slot) => {
                **slot = Some(self.upump_mgr.clone());
                Ok(())
            }
            Event::ProvideRequest(request) if request.kind() == RequestKind::UpumpMgr => {
                request.answer(RequestAnswer::UpumpMgr(self.upump_mgr.clone()));
                Ok(())
            }
            _ => throw_next(self.next.as_ref(), ident, event),
        }
    }
}

/// Answers `need-ubuf-mgr` by building a manager over application memory
/// matching the requested flow definition.
///
/// The mapping is by flow-def root: `block.` flows get a block manager
/// with header margins, `pic.` flows a planar 4:2:0 8-bit manager and
/// `sound.` flows an interleaved 16-bit stereo manager. Finer plane
/// negotiation is a module concern and travels in the flow def itself.
pub struct UprobeUbufMem {
    next: Option<UprobeRef>,
    umem_mgr: Arc<dyn UmemMgr>,
}

impl UprobeUbufMem {
    pub fn new(next: Option<UprobeRef>, umem_mgr: Arc<dyn UmemMgr>) -> Rc<Self> {
        Rc::new(Self { next, umem_mgr })
    }

    fn build(&self, flow_def: &Uref) -> Option<UbufMgr> {
        let def = flow_def.flow_def()?;
        if def.starts_with("block.") {
            return Some(UbufMgr::Block(UbufBlockMgr::new(
                Arc::clone(&self.umem_mgr),
                32,
                32,
                64,
            )));
        }
        if def.starts_with("pic.") {
            return UbufPicMgr::yuv420(Arc::clone(&self.umem_mgr), 16)
                .ok()
                .map(UbufMgr::Pic);
        }
        if def.starts_with("sound.") {
            return UbufSoundMgr::new(
                Arc::clone(&self.umem_mgr),
                4,
                16,
                vec![ChannelDesc::new("lr")],
            )
            .ok()
            .map(UbufMgr::Sound);
        }
        None
    }
}

impl Uprobe for UprobeUbufMem {
    fn catch(&self, ident: &PipeIdent, event: &mut Event<'_>) -> Result<()> {
        match event {
            Event::NeedUbufMgr { flow_def, answer } => match self.build(flow_def) {
                Some(mgr) => {
                    **answer = Some(mgr);
                    Ok(())
                }
                None => throw_next(self.next.as_ref(), ident, event),
            },
            Event::ProvideRequest(request) if request.kind() == RequestKind::UbufMgr => {
                let Some(flow_def) = request.flow_def() else {
                    return throw_next(self.next.as_ref(), ident, event);
                };
                match self.build(flow_def) {
                    Some(mgr) => {
                        let flow = Rc::new(flow_def.dup());
                        request.answer(RequestAnswer::UbufMgr(mgr, Some(flow)));
                        Ok(())
                    }
                    None => throw_next(self.next.as_ref(), ident, event),
                }
            }
            _ => throw_next(self.next.as_ref(), ident, event),
        }
    }
}
