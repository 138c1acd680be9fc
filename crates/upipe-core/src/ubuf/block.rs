//! Linear byte buffers with zero-copy segmentation.
//!
//! A block buffer is a chain of segments, each a `[offset, offset+len)`
//! window into a refcounted backing slab. Splicing, appending and
//! inserting rearrange segments without touching payload bytes; gather
//! I/O walks the chain in order. Writing maps a contiguous range and is
//! only permitted on segments whose slab is not shared.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::umem::{Umem, UmemMgr};

/// One window into a backing slab.
#[derive(Debug, Clone)]
struct Segment {
    mem: Arc<Umem>,
    off: usize,
    len: usize,
}

/// Segmented linear byte buffer.
#[derive(Debug, Clone)]
pub struct UbufBlock {
    segs: Vec<Segment>,
}

impl UbufBlock {
    /// Total visible size: the sum of all segment lengths.
    pub fn size(&self) -> usize {
        self.segs.iter().map(|s| s.len).sum()
    }

    /// Number of segments in the chain.
    pub fn segments(&self) -> usize {
        self.segs.len()
    }

    /// Duplicate without copying: segments are cloned, slab refcounts
    /// bumped. Writes on either handle now answer `Busy` until one side
    /// lets go or copies.
    pub fn dup(&self) -> UbufBlock {
        self.clone()
    }

    /// True when every touched slab is exclusively owned, i.e. a write
    /// map over `[offset, offset+size)` would succeed.
    pub fn is_writable(&self, offset: usize, size: usize) -> bool {
        let mut checked = 0usize;
        let mut cur = 0usize;
        for seg in &self.segs {
            let seg_start = cur;
            let seg_end = cur + seg.len;
            cur = seg_end;
            if seg_end <= offset {
                continue;
            }
            if seg_start >= offset + size {
                break;
            }
            if Arc::strong_count(&seg.mem) != 1 {
                return false;
            }
            checked += seg_end.min(offset + size) - seg_start.max(offset);
        }
        checked == size
    }

    /// Locate the segment containing logical `offset`.
    ///
    /// Returns `(segment index, offset within the segment)`. The logical
    /// end position maps to one-past-the-last segment with offset 0.
    fn seek(&self, offset: usize) -> Result<(usize, usize)> {
        let mut remaining = offset;
        for (idx, seg) in self.segs.iter().enumerate() {
            if remaining < seg.len {
                return Ok((idx, remaining));
            }
            remaining -= seg.len;
        }
        if remaining == 0 {
            Ok((self.segs.len(), 0))
        } else {
            Err(Error::Invalid)
        }
    }

    /// Map a read range. Returns the contiguous chunk starting at
    /// `offset`, at most `size` bytes long; a chunk shorter than `size`
    /// means the range straddles a segment boundary and the caller loops
    /// with an advanced offset.
    pub fn read(&self, offset: usize, size: usize) -> Result<&[u8]> {
        if offset + size > self.size() {
            return Err(Error::Invalid);
        }
        if size == 0 {
            return Ok(&[]);
        }
        let (idx, in_seg) = self.seek(offset)?;
        let seg = &self.segs[idx];
        let avail = (seg.len - in_seg).min(size);
        let start = seg.off + in_seg;
        Ok(&seg.mem[start..start + avail])
    }

    /// Map a write range. Same contiguity contract as [`read`](Self::read);
    /// fails with `Busy` when the touched slab is shared.
    pub fn write(&mut self, offset: usize, size: usize) -> Result<&mut [u8]> {
        if offset + size > self.size() {
            return Err(Error::Invalid);
        }
        let (idx, in_seg) = self.seek(offset)?;
        if idx == self.segs.len() {
            return Ok(&mut []);
        }
        let seg = &mut self.segs[idx];
        let avail = (seg.len - in_seg).min(size);
        let start = seg.off + in_seg;
        let mem = Arc::get_mut(&mut seg.mem).ok_or(Error::Busy)?;
        Ok(&mut mem[start..start + avail])
    }

    /// Iterate the chunks covering `[offset, offset+size)` in order.
    pub fn chunks(&self, offset: usize, size: usize) -> Result<Vec<&[u8]>> {
        if offset + size > self.size() {
            return Err(Error::Invalid);
        }
        let mut out = Vec::new();
        let mut pos = offset;
        let mut left = size;
        while left > 0 {
            let chunk = self.read(pos, left)?;
            debug_assert!(!chunk.is_empty());
            pos += chunk.len();
            left -= chunk.len();
            out.push(chunk);
        }
        Ok(out)
    }

    /// Copy `[offset, offset+size)` into a fresh vector.
    pub fn extract(&self, offset: usize, size: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(size);
        for chunk in self.chunks(offset, size)? {
            out.extend_from_slice(chunk);
        }
        Ok(out)
    }

    /// Copy the whole visible range into a fresh vector.
    pub fn extract_all(&self) -> Vec<u8> {
        self.extract(0, self.size()).expect("full range is valid")
    }

    /// Copy bytes from `data` into the buffer at `offset`, walking
    /// segments. All touched slabs must be exclusively owned.
    pub fn copy_from(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        if !self.is_writable(offset, data.len()) {
            return Err(Error::Busy);
        }
        let mut pos = offset;
        let mut src = data;
        while !src.is_empty() {
            let dst = self.write(pos, src.len())?;
            let n = dst.len();
            dst.copy_from_slice(&src[..n]);
            pos += n;
            src = &src[n..];
        }
        Ok(())
    }

    /// Compare the visible bytes with another block buffer.
    pub fn compare(&self, other: &UbufBlock) -> bool {
        if self.size() != other.size() {
            return false;
        }
        self.extract_all() == other.extract_all()
    }

    /// Build a new buffer aliasing `[offset, offset+size)` of this one.
    /// Zero-copy: slab refcounts are bumped.
    pub fn splice(&self, offset: usize, size: usize) -> Result<UbufBlock> {
        if offset + size > self.size() {
            return Err(Error::Invalid);
        }
        let mut segs = Vec::new();
        let mut pos = 0usize;
        for seg in &self.segs {
            let seg_start = pos;
            let seg_end = pos + seg.len;
            pos = seg_end;
            if seg_end <= offset || seg_start >= offset + size {
                continue;
            }
            let take_start = offset.max(seg_start) - seg_start;
            let take_end = (offset + size).min(seg_end) - seg_start;
            segs.push(Segment {
                mem: Arc::clone(&seg.mem),
                off: seg.off + take_start,
                len: take_end - take_start,
            });
        }
        Ok(UbufBlock { segs })
    }

    /// Chain `other` at the end. Zero-copy.
    pub fn append(&mut self, other: UbufBlock) {
        self.segs.extend(other.segs);
    }

    /// Insert `other` at logical `offset`, splitting the segment at that
    /// point when needed. Zero-copy.
    pub fn insert(&mut self, offset: usize, other: UbufBlock) -> Result<()> {
        let (idx, in_seg) = self.seek(offset)?;
        if in_seg == 0 {
            self.segs.splice(idx..idx, other.segs);
        } else {
            let seg = self.segs[idx].clone();
            let head = Segment {
                mem: Arc::clone(&seg.mem),
                off: seg.off,
                len: in_seg,
            };
            let tail = Segment {
                mem: seg.mem,
                off: seg.off + in_seg,
                len: seg.len - in_seg,
            };
            let mut replacement = vec![head];
            replacement.extend(other.segs);
            replacement.push(tail);
            self.segs.splice(idx..=idx, replacement);
        }
        Ok(())
    }

    /// Drop `[offset, offset+size)`, truncating or removing every segment
    /// it covers.
    pub fn delete(&mut self, offset: usize, size: usize) -> Result<()> {
        if offset + size > self.size() {
            return Err(Error::Invalid);
        }
        let mut segs = Vec::with_capacity(self.segs.len());
        let mut pos = 0usize;
        for seg in self.segs.drain(..) {
            let seg_start = pos;
            let seg_end = pos + seg.len;
            pos = seg_end;
            if seg_end <= offset || seg_start >= offset + size {
                segs.push(seg);
                continue;
            }
            // Leading remainder.
            if seg_start < offset {
                segs.push(Segment {
                    mem: Arc::clone(&seg.mem),
                    off: seg.off,
                    len: offset - seg_start,
                });
            }
            // Trailing remainder.
            if seg_end > offset + size {
                let skip = offset + size - seg_start;
                segs.push(Segment {
                    mem: seg.mem,
                    off: seg.off + skip,
                    len: seg_end - (offset + size),
                });
            }
        }
        self.segs = segs;
        Ok(())
    }

    /// Resize the visible range: drop `skip` bytes at the head (or, when
    /// `skip` is negative, reveal bytes from the head margin), then clamp
    /// or extend the total size to `new_size`.
    ///
    /// Extending (at either end) reuses slab margins and requires the
    /// boundary slab to be exclusively owned; when the margin cannot
    /// cover the request the call fails with `Invalid` and the caller
    /// goes through a copying path.
    pub fn resize(&mut self, skip: isize, new_size: usize) -> Result<()> {
        // Head adjustment.
        if skip > 0 {
            self.delete(0, skip as usize)?;
        } else if skip < 0 {
            let grow = (-skip) as usize;
            let first = self.segs.first_mut().ok_or(Error::Invalid)?;
            if first.off < grow {
                return Err(Error::Invalid);
            }
            if Arc::strong_count(&first.mem) != 1 {
                return Err(Error::Busy);
            }
            first.off -= grow;
            first.len += grow;
        }

        // Tail adjustment.
        let cur = self.size();
        if new_size < cur {
            self.delete(new_size, cur - new_size)?;
        } else if new_size > cur {
            let grow = new_size - cur;
            let last = self.segs.last_mut().ok_or(Error::Invalid)?;
            if last.off + last.len + grow > last.mem.size() {
                return Err(Error::Invalid);
            }
            if Arc::strong_count(&last.mem) != 1 {
                return Err(Error::Busy);
            }
            last.len += grow;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Factory for block buffers.
///
/// `prepend` and `append` margins are allocated around every fresh buffer
/// so headers and trailers can later be revealed in place by
/// [`UbufBlock::resize`].
pub struct UbufBlockMgr {
    umem_mgr: Arc<dyn UmemMgr>,
    prepend: usize,
    append: usize,
    align: usize,
}

impl UbufBlockMgr {
    /// Create a manager. `align` must be a power of two; fresh payloads
    /// start at an `align`-multiple offset within their slab.
    pub fn new(
        umem_mgr: Arc<dyn UmemMgr>,
        prepend: usize,
        append: usize,
        align: usize,
    ) -> Arc<Self> {
        assert!(align.is_power_of_two());
        Arc::new(Self {
            umem_mgr,
            prepend,
            append,
            align,
        })
    }

    /// Allocate a single-segment buffer of `size` visible bytes.
    pub fn alloc(&self, size: usize) -> Result<UbufBlock> {
        let head = self.prepend.next_multiple_of(self.align);
        let mem = self.umem_mgr.alloc(head + size + self.append)?;
        Ok(UbufBlock {
            segs: vec![Segment {
                mem: Arc::new(mem),
                off: head,
                len: size,
            }],
        })
    }

    /// Allocate and fill from a slice.
    pub fn alloc_from_slice(&self, data: &[u8]) -> Result<UbufBlock> {
        let mut ubuf = self.alloc(data.len())?;
        ubuf.copy_from(0, data)?;
        Ok(ubuf)
    }

    /// Deep-copy `[skip, skip+size)` of `source` into a freshly allocated
    /// single-segment buffer. This is the copy half of copy-on-write.
    pub fn copy(&self, source: &UbufBlock, skip: usize, size: usize) -> Result<UbufBlock> {
        let bytes = source.extract(skip, size)?;
        self.alloc_from_slice(&bytes)
    }

    /// Merge a possibly-segmented buffer into a single fresh segment.
    pub fn merge(&self, source: &UbufBlock) -> Result<UbufBlock> {
        self.copy(source, 0, source.size())
    }
}

impl std::fmt::Debug for UbufBlockMgr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UbufBlockMgr")
            .field("prepend", &self.prepend)
            .field("append", &self.append)
            .field("align", &self.align)
            .finish()
    }
}
