//! # upipe-core
//!
//! **A media-processing pipeline is a graph of small, composable pipes.**
//!
//! `upipe-core` is the runtime those pipes are built on: typed
//! reference-counted data units, copy-on-write payload buffers, a
//! single-threaded cooperative event loop, and the lifecycle / control /
//! event protocol every pipe speaks. Codecs, framers, muxers and device
//! sinks are clients of this crate; none of them live here.
//!
//! ## Quick start
//!
//! ```no_run
//! use upipe_core::udict::UdictMgr;
//! use upipe_core::upump::UpumpMgr;
//! use upipe_core::uref::UrefMgr;
//!
//! // One event loop per thread.
//! let upump_mgr = UpumpMgr::new();
//!
//! // Factories for data units.
//! let udict_mgr = UdictMgr::new(64);
//! let uref_mgr = UrefMgr::new(udict_mgr);
//!
//! // A source pipe would now emit urefs from a timer pump; run the loop.
//! let mut uref = uref_mgr.alloc_flow("void.");
//! uref.set_duration(40_000 * 27); // 40 ms in 27 MHz ticks
//! upump_mgr.run();
//! ```
//!
//! ## Architecture
//!
//! Data flows *down* (source → transforms → sink) through direct
//! [`upipe::Upipe::input`] calls; control commands travel the same way.
//! Events travel *up* through per-pipe [`uprobe`] chains. Time is 27 MHz
//! ticks from a [`uclock`]. Everything on one loop runs sequentially;
//! crossing threads is explicit through [`uqueue`] envelopes and the
//! [`xfer`]/[`worker`] proxies.
//!
//! Ownership is the concurrency model: an object is either immutable and
//! shared (`Arc`), or owned by exactly one loop (`Rc`). Payload bytes are
//! shared copy-on-write: writing to a buffer whose slab is shared answers
//! [`error::Error::Busy`] and the writer duplicates first.

pub mod error;
pub mod ubuf;
pub mod uclock;
pub mod udict;
pub mod umem;
pub mod upipe;
pub mod upool;
pub mod uprobe;
pub mod upump;
pub mod uqueue;
pub mod uref;
pub mod urequest;
pub mod worker;
pub mod xfer;

pub use error::{Error, Result};
pub use ubuf::{Ubuf, UbufBlockMgr, UbufMgr, UbufPicMgr, UbufSoundMgr};
pub use uclock::{UCLOCK_FREQ, Uclock, UclockRef, UclockStd};
pub use udict::{AttrType, AttrValue, Udict, UdictMgr};
pub use umem::{Umem, UmemAllocMgr, UmemMgr, UmemPoolMgr};
pub use upipe::{AllocArgs, PipeCmd, Upipe, UpipeControl, UpipeMgr, UpipeRef};
pub use upool::Upool;
pub use uprobe::{Event, LogLevel, PipeIdent, Uprobe, UprobeRef};
pub use upump::{Upump, UpumpBlocker, UpumpMgr};
pub use uref::{Uref, UrefMgr};
pub use urequest::{RequestAnswer, RequestKind, Urequest, UrequestRef};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
