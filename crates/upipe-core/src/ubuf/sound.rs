//! Planar sound buffers.
//!
//! A sound manager is parameterised by a channel descriptor table keyed by
//! channel name ("l", "r", or "lr" for interleaved stereo) and a sample
//! octet size shared by all channels. Every channel plane lives in one
//! refcounted slab; resizing advances a per-buffer sample window without
//! copying.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::umem::{Umem, UmemMgr};

/// Static description of one channel plane.
#[derive(Debug, Clone)]
pub struct ChannelDesc {
    /// Channel name.
    pub channel: &'static str,
}

impl ChannelDesc {
    pub const fn new(channel: &'static str) -> Self {
        Self { channel }
    }
}

/// Planar sound buffer.
#[derive(Debug, Clone)]
pub struct UbufSound {
    mgr: Arc<UbufSoundMgr>,
    slab: Arc<Umem>,
    /// Byte offset of each channel plane inside the slab.
    plane_offsets: Vec<usize>,
    /// Visible window, in samples.
    offset: usize,
    samples: usize,
}

impl UbufSound {
    /// Number of visible samples.
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Octets per sample.
    pub fn sample_size(&self) -> usize {
        self.mgr.sample_size
    }

    /// Iterate channel names.
    pub fn plane_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.mgr.channels.iter().map(|c| c.channel)
    }

    /// Duplicate without copying samples.
    pub fn dup(&self) -> UbufSound {
        self.clone()
    }

    /// True when a write map would succeed.
    pub fn is_writable(&self) -> bool {
        Arc::strong_count(&self.slab) == 1
    }

    fn plane_index(&self, channel: &str) -> Result<usize> {
        self.mgr
            .channels
            .iter()
            .position(|c| c.channel == channel)
            .ok_or(Error::Invalid)
    }

    fn plane_byte_range(&self, idx: usize, offset: usize, size: usize) -> Result<(usize, usize)> {
        if offset + size > self.samples {
            return Err(Error::Invalid);
        }
        let sample_size = self.mgr.sample_size;
        let start =
            self.plane_offsets[idx] + (self.offset + offset) * sample_size;
        Ok((start, size * sample_size))
    }

    /// Map `size` samples of one channel starting at `offset` for reading.
    pub fn plane_read(&self, channel: &str, offset: usize, size: usize) -> Result<&[u8]> {
        let idx = self.plane_index(channel)?;
        let (start, len) = self.plane_byte_range(idx, offset, size)?;
        Ok(&self.slab[start..start + len])
    }

    /// Map `size` samples of one channel for writing. Fails with `Busy`
    /// when the slab is shared.
    pub fn plane_write(
        &mut self,
        channel: &str,
        offset: usize,
        size: usize,
    ) -> Result<&mut [u8]> {
        let idx = self.plane_index(channel)?;
        let (start, len) = self.plane_byte_range(idx, offset, size)?;
        let slab = Arc::get_mut(&mut self.slab).ok_or(Error::Busy)?;
        Ok(&mut slab[start..start + len])
    }

    /// Advance the window by `offset` samples and clamp it to `size`
    /// (`None` keeps everything remaining). All planes move together.
    pub fn resize(&mut self, offset: usize, size: Option<usize>) -> Result<()> {
        if offset > self.samples {
            return Err(Error::Invalid);
        }
        let remaining = self.samples - offset;
        let size = size.unwrap_or(remaining);
        if size > remaining {
            return Err(Error::Invalid);
        }
        self.offset += offset;
        self.samples = size;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Factory for sound buffers of one channel layout.
pub struct UbufSoundMgr {
    umem_mgr: Arc<dyn UmemMgr>,
    sample_size: usize,
    align: usize,
    channels: Vec<ChannelDesc>,
    weak_self: std::sync::Weak<UbufSoundMgr>,
}

impl UbufSoundMgr {
    /// Create a manager for `channels` planes of `sample_size`-octet
    /// samples. Planes start at `align`-multiple offsets in the slab.
    pub fn new(
        umem_mgr: Arc<dyn UmemMgr>,
        sample_size: usize,
        align: usize,
        channels: Vec<ChannelDesc>,
    ) -> Result<Arc<Self>> {
        if sample_size == 0 || channels.is_empty() || !align.is_power_of_two() {
            return Err(Error::Invalid);
        }
        Ok(Arc::new_cyclic(|weak| Self {
            umem_mgr,
            sample_size,
            align,
            channels,
            weak_self: weak.clone(),
        }))
    }

    /// Allocate a buffer of `samples` samples per channel.
    pub fn alloc(&self, samples: usize) -> Result<UbufSound> {
        let this = self.weak_self.upgrade().ok_or(Error::Alloc)?;
        let plane_bytes = (samples * self.sample_size).next_multiple_of(self.align);
        let mut plane_offsets = Vec::with_capacity(self.channels.len());
        for idx in 0..self.channels.len() {
            plane_offsets.push(idx * plane_bytes);
        }
        let slab = this.umem_mgr.alloc(plane_bytes * self.channels.len())?;
        Ok(UbufSound {
            mgr: this,
            slab: Arc::new(slab),
            plane_offsets,
            offset: 0,
            samples,
        })
    }

    /// Deep-copy the visible window of `src` into a fresh buffer.
    pub fn copy(&self, src: &UbufSound) -> Result<UbufSound> {
        let mut fresh = self.alloc(src.samples())?;
        if src.sample_size() != self.sample_size {
            return Err(Error::Invalid);
        }
        let names: Vec<&'static str> = fresh.plane_names().collect();
        for channel in names {
            let data = src.plane_read(channel, 0, src.samples())?.to_vec();
            fresh
                .plane_write(channel, 0, src.samples())?
                .copy_from_slice(&data);
        }
        Ok(fresh)
    }
}

impl std::fmt::Debug for UbufSoundMgr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UbufSoundMgr")
            .field("sample_size", &self.sample_size)
            .field("channels", &self.channels.len())
            .finish()
    }
}
