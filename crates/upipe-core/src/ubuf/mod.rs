//! Polymorphic media payload buffers.
//!
//! Three variants share one handle type: linear byte [`block`]s (possibly
//! segmented for gather I/O), planar [`pic`]tures and planar [`sound`].
//! All variants sit on refcounted backing slabs: duplicating a buffer
//! clones geometry and bumps the slab refcount; writing requires exclusive
//! ownership of the touched slab (copy-on-write: a shared buffer answers
//! `Busy` and the caller duplicates through the manager's copy path).

pub mod block;
pub mod pic;
pub mod sound;

pub use block::{UbufBlock, UbufBlockMgr};
pub use pic::{PlaneDesc, UbufPic, UbufPicMgr};
pub use sound::{ChannelDesc, UbufSound, UbufSoundMgr};

use std::sync::Arc;

use crate::error::{Error, Result};

/// Shared handle over a buffer manager of any variant. This is what
/// travels in `need-ubuf-mgr` answers.
#[derive(Debug, Clone)]
pub enum UbufMgr {
    Block(Arc<UbufBlockMgr>),
    Pic(Arc<UbufPicMgr>),
    Sound(Arc<UbufSoundMgr>),
}

impl UbufMgr {
    /// Access the block manager.
    pub fn as_block(&self) -> Result<&Arc<UbufBlockMgr>> {
        match self {
            UbufMgr::Block(m) => Ok(m),
            _ => Err(Error::Invalid),
        }
    }

    /// Access the picture manager.
    pub fn as_pic(&self) -> Result<&Arc<UbufPicMgr>> {
        match self {
            UbufMgr::Pic(m) => Ok(m),
            _ => Err(Error::Invalid),
        }
    }

    /// Access the sound manager.
    pub fn as_sound(&self) -> Result<&Arc<UbufSoundMgr>> {
        match self {
            UbufMgr::Sound(m) => Ok(m),
            _ => Err(Error::Invalid),
        }
    }
}

/// A payload buffer of any variant.
#[derive(Debug)]
pub enum Ubuf {
    /// Linear byte range, possibly segmented.
    Block(UbufBlock),
    /// Planar picture.
    Pic(UbufPic),
    /// Planar sound.
    Sound(UbufSound),
}

impl Ubuf {
    /// Duplicate the buffer without copying payload bytes. Both handles
    /// then see the same backing slabs; writes require a further copy.
    pub fn dup(&self) -> Ubuf {
        match self {
            Ubuf::Block(b) => Ubuf::Block(b.dup()),
            Ubuf::Pic(p) => Ubuf::Pic(p.dup()),
            Ubuf::Sound(s) => Ubuf::Sound(s.dup()),
        }
    }

    /// Access the block variant.
    pub fn as_block(&self) -> Result<&UbufBlock> {
        match self {
            Ubuf::Block(b) => Ok(b),
            _ => Err(Error::Invalid),
        }
    }

    /// Mutable access to the block variant.
    pub fn as_block_mut(&mut self) -> Result<&mut UbufBlock> {
        match self {
            Ubuf::Block(b) => Ok(b),
            _ => Err(Error::Invalid),
        }
    }

    /// Access the picture variant.
    pub fn as_pic(&self) -> Result<&UbufPic> {
        match self {
            Ubuf::Pic(p) => Ok(p),
            _ => Err(Error::Invalid),
        }
    }

    /// Mutable access to the picture variant.
    pub fn as_pic_mut(&mut self) -> Result<&mut UbufPic> {
        match self {
            Ubuf::Pic(p) => Ok(p),
            _ => Err(Error::Invalid),
        }
    }

    /// Access the sound variant.
    pub fn as_sound(&self) -> Result<&UbufSound> {
        match self {
            Ubuf::Sound(s) => Ok(s),
            _ => Err(Error::Invalid),
        }
    }

    /// Mutable access to the sound variant.
    pub fn as_sound_mut(&mut self) -> Result<&mut UbufSound> {
        match self {
            Ubuf::Sound(s) => Ok(s),
            _ => Err(Error::Invalid),
        }
    }
}
