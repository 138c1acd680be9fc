//! Data units: one attribute dictionary plus an optional payload.
//!
//! A [`Uref`] is what travels through pipes. Duplicating one clones the
//! dictionary and bumps the payload's slab refcounts, so siblings share
//! bytes until somebody needs to write (see the `ubuf` copy-on-write
//! protocol). Ownership is single-holder: a uref sits in at most one
//! queue, and handing it to `input` moves it.

pub mod clock;
pub mod flow;

use std::sync::Arc;

use crate::ubuf::Ubuf;
use crate::udict::{AttrSnapshot, Udict, UdictMgr};

pub use clock::DateType;

/// One data unit.
#[derive(Debug)]
pub struct Uref {
    udict: Udict,
    ubuf: Option<Ubuf>,
}

impl Uref {
    /// Duplicate: cloned dictionary, shared payload.
    pub fn dup(&self) -> Uref {
        Uref {
            udict: self.udict.clone(),
            ubuf: self.ubuf.as_ref().map(Ubuf::dup),
        }
    }

    /// The attribute dictionary.
    pub fn udict(&self) -> &Udict {
        &self.udict
    }

    /// Mutable access to the attribute dictionary.
    pub fn udict_mut(&mut self) -> &mut Udict {
        &mut self.udict
    }

    /// The payload, if any.
    pub fn ubuf(&self) -> Option<&Ubuf> {
        self.ubuf.as_ref()
    }

    /// Mutable access to the payload.
    pub fn ubuf_mut(&mut self) -> Option<&mut Ubuf> {
        self.ubuf.as_mut()
    }

    /// Replace the payload, returning the previous one.
    pub fn attach_ubuf(&mut self, ubuf: Ubuf) -> Option<Ubuf> {
        self.ubuf.replace(ubuf)
    }

    /// Take the payload out.
    pub fn detach_ubuf(&mut self) -> Option<Ubuf> {
        self.ubuf.take()
    }

    /// Serializable dump of all attributes, for debugging probes.
    pub fn attr_snapshot(&self) -> Vec<AttrSnapshot> {
        self.udict.snapshot()
    }
}

/// Factory for data units, parameterised over a dictionary manager.
pub struct UrefMgr {
    udict_mgr: Arc<UdictMgr>,
}

impl UrefMgr {
    /// Create a manager drawing dictionaries from `udict_mgr`.
    pub fn new(udict_mgr: Arc<UdictMgr>) -> Arc<Self> {
        Arc::new(Self { udict_mgr })
    }

    /// Allocate an empty data unit (no payload, empty dictionary).
    pub fn alloc(&self) -> Uref {
        Uref {
            udict: self.udict_mgr.alloc(),
            ubuf: None,
        }
    }

    /// Allocate a control unit carrying a flow definition.
    pub fn alloc_flow(&self, def: &str) -> Uref {
        let mut uref = self.alloc();
        uref.set_flow_def(def);
        uref
    }
}
