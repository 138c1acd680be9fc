//! Planar picture buffers.
//!
//! A picture manager is parameterised by a plane descriptor table: each
//! plane carries horizontal/vertical subsampling and the byte width of one
//! macropixel ("y8", "u8", "v8" for planar 4:2:0, packed "y8u8y8v8" for
//! 4:2:2, ...). Allocation reserves margins on all four sides so croppers
//! and padders can move the visible window without copying; consumers get
//! aligned strides for vectorised access.
//!
//! All planes of one picture live in a single refcounted slab: duplicating
//! a picture bumps the slab, and any write map requires exclusive slab
//! ownership.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::umem::{Umem, UmemMgr};

/// Static description of one plane.
#[derive(Debug, Clone)]
pub struct PlaneDesc {
    /// Plane name ("y8", "u8", "lr", ...).
    pub chroma: &'static str,
    /// Horizontal subsampling: pixels per plane sample horizontally.
    pub hsub: usize,
    /// Vertical subsampling: lines per plane line.
    pub vsub: usize,
    /// Bytes per macropixel on this plane.
    pub macropixel_size: usize,
}

impl PlaneDesc {
    pub const fn new(
        chroma: &'static str,
        hsub: usize,
        vsub: usize,
        macropixel_size: usize,
    ) -> Self {
        Self {
            chroma,
            hsub,
            vsub,
            macropixel_size,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PlaneGeo {
    offset: usize,
    stride: usize,
}

/// Read-only rectangular map of one plane.
#[derive(Debug)]
pub struct PlaneView<'a> {
    /// Bytes from the first mapped byte to the last; rows are `stride`
    /// apart, each `width_bytes` long.
    pub data: &'a [u8],
    pub stride: usize,
    pub width_bytes: usize,
    pub lines: usize,
}

impl PlaneView<'_> {
    /// Iterate the mapped rows.
    pub fn rows(&self) -> impl Iterator<Item = &[u8]> {
        (0..self.lines).map(move |l| {
            let start = l * self.stride;
            &self.data[start..start + self.width_bytes]
        })
    }
}

/// Mutable rectangular map of one plane.
#[derive(Debug)]
pub struct PlaneViewMut<'a> {
    pub data: &'a mut [u8],
    pub stride: usize,
    pub width_bytes: usize,
    pub lines: usize,
}

impl PlaneViewMut<'_> {
    /// Iterate the mapped rows mutably.
    pub fn rows_mut(&mut self) -> impl Iterator<Item = &mut [u8]> {
        let width = self.width_bytes;
        let lines = self.lines;
        self.data
            .chunks_mut(self.stride.max(1))
            .take(lines)
            .map(move |row| {
                let take = width.min(row.len());
                &mut row[..take]
            })
    }
}

/// Planar picture buffer.
#[derive(Debug, Clone)]
pub struct UbufPic {
    mgr: Arc<UbufPicMgr>,
    slab: Arc<Umem>,
    planes: Vec<PlaneGeo>,
    /// Allocated extents including margins, in pixels / lines.
    alloc_hsize: usize,
    alloc_vsize: usize,
    /// Visible window.
    hoffset: usize,
    voffset: usize,
    hsize: usize,
    vsize: usize,
}

impl UbufPic {
    /// Visible size: `(width, height, pixels per macropixel)`.
    pub fn size(&self) -> (usize, usize, usize) {
        (self.hsize, self.vsize, self.mgr.macropixel)
    }

    /// Iterate plane names.
    pub fn plane_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.mgr.planes.iter().map(|p| p.chroma)
    }

    /// Stride and subsampling of one plane:
    /// `(stride, hsub, vsub, macropixel_size)`.
    pub fn plane_size(&self, chroma: &str) -> Result<(usize, usize, usize, usize)> {
        let (idx, desc) = self.mgr.plane(chroma)?;
        let geo = self.planes[idx];
        Ok((geo.stride, desc.hsub, desc.vsub, desc.macropixel_size))
    }

    /// Duplicate without copying pixels.
    pub fn dup(&self) -> UbufPic {
        self.clone()
    }

    /// True when a write map on any plane would succeed.
    pub fn is_writable(&self) -> bool {
        Arc::strong_count(&self.slab) == 1
    }

    /// Normalize a requested rectangle against the visible window.
    ///
    /// Negative offsets address from the far edge; `-1` extents mean "to
    /// the end".
    fn norm_rect(
        &self,
        hoff: i64,
        voff: i64,
        hsz: i64,
        vsz: i64,
    ) -> Result<(usize, usize, usize, usize)> {
        let hoff = if hoff < 0 { self.hsize as i64 + hoff } else { hoff };
        let voff = if voff < 0 { self.vsize as i64 + voff } else { voff };
        if hoff < 0 || voff < 0 {
            return Err(Error::Invalid);
        }
        let hsz = if hsz == -1 {
            self.hsize as i64 - hoff
        } else {
            hsz
        };
        let vsz = if vsz == -1 {
            self.vsize as i64 - voff
        } else {
            vsz
        };
        if hsz < 0
            || vsz < 0
            || (hoff + hsz) as usize > self.hsize
            || (voff + vsz) as usize > self.vsize
        {
            return Err(Error::Invalid);
        }
        Ok((hoff as usize, voff as usize, hsz as usize, vsz as usize))
    }

    /// Byte geometry of a rectangle on one plane. The rectangle origin and
    /// width must land on whole plane macropixels.
    fn plane_rect(
        &self,
        idx: usize,
        desc: &PlaneDesc,
        hoff: usize,
        voff: usize,
        hsz: usize,
        vsz: usize,
    ) -> Result<(usize, usize, usize, usize)> {
        let hstep = desc.hsub * self.mgr.macropixel;
        let abs_h = self.hoffset + hoff;
        let abs_v = self.voffset + voff;
        if abs_h % hstep != 0 || hsz % hstep != 0 || abs_v % desc.vsub != 0 {
            return Err(Error::Invalid);
        }
        let geo = self.planes[idx];
        let first = geo.offset + (abs_v / desc.vsub) * geo.stride
            + (abs_h / hstep) * desc.macropixel_size;
        let width_bytes = (hsz / hstep) * desc.macropixel_size;
        let lines = vsz.div_ceil(desc.vsub);
        Ok((first, geo.stride, width_bytes, lines))
    }

    /// Map a rectangle of one plane for reading.
    pub fn plane_read(
        &self,
        chroma: &str,
        hoff: i64,
        voff: i64,
        hsz: i64,
        vsz: i64,
    ) -> Result<PlaneView<'_>> {
        let (idx, desc) = self.mgr.plane(chroma)?;
        let (hoff, voff, hsz, vsz) = self.norm_rect(hoff, voff, hsz, vsz)?;
        let (first, stride, width_bytes, lines) =
            self.plane_rect(idx, desc, hoff, voff, hsz, vsz)?;
        let span = if lines == 0 {
            0
        } else {
            (lines - 1) * stride + width_bytes
        };
        Ok(PlaneView {
            data: &self.slab[first..first + span],
            stride,
            width_bytes,
            lines,
        })
    }

    /// Map a rectangle of one plane for writing. Fails with `Busy` when
    /// the slab is shared.
    pub fn plane_write(
        &mut self,
        chroma: &str,
        hoff: i64,
        voff: i64,
        hsz: i64,
        vsz: i64,
    ) -> Result<PlaneViewMut<'_>> {
        let (idx, desc) = self.mgr.plane(chroma)?;
        let (hoff, voff, hsz, vsz) = self.norm_rect(hoff, voff, hsz, vsz)?;
        let (first, stride, width_bytes, lines) =
            self.plane_rect(idx, desc, hoff, voff, hsz, vsz)?;
        let span = if lines == 0 {
            0
        } else {
            (lines - 1) * stride + width_bytes
        };
        let slab = Arc::get_mut(&mut self.slab).ok_or(Error::Busy)?;
        Ok(PlaneViewMut {
            data: &mut slab[first..first + span],
            stride,
            width_bytes,
            lines,
        })
    }

    /// Move and resize the visible window without copying.
    ///
    /// `lskip`/`tskip` shift the origin (negative values reveal margin
    /// pixels); `-1` extents keep the current far edge. Fails with
    /// `Invalid`, leaving the window untouched, when the request
    /// exceeds the allocated margins; callers then go through
    /// [`UbufPicMgr::copy`].
    pub fn resize(&mut self, lskip: i64, tskip: i64, new_hsize: i64, new_vsize: i64) -> Result<()> {
        let hoffset = self.hoffset as i64 + lskip;
        let voffset = self.voffset as i64 + tskip;
        let hsize = if new_hsize == -1 {
            self.hsize as i64 - lskip
        } else {
            new_hsize
        };
        let vsize = if new_vsize == -1 {
            self.vsize as i64 - tskip
        } else {
            new_vsize
        };
        if hoffset < 0
            || voffset < 0
            || hsize < 0
            || vsize < 0
            || (hoffset + hsize) as usize > self.alloc_hsize
            || (voffset + vsize) as usize > self.alloc_vsize
        {
            return Err(Error::Invalid);
        }
        // The new origin must stay addressable on every plane.
        for desc in &self.mgr.planes {
            let hstep = desc.hsub * self.mgr.macropixel;
            if hoffset as usize % hstep != 0 || voffset as usize % desc.vsub != 0 {
                return Err(Error::Invalid);
            }
        }
        self.hoffset = hoffset as usize;
        self.voffset = voffset as usize;
        self.hsize = hsize as usize;
        self.vsize = vsize as usize;
        Ok(())
    }

    /// Fill the visible window. Luma and packed planes are cleared to 0;
    /// planes named after chroma differences ("u8", "v8", ...) get the
    /// mid value 0x80.
    pub fn clear(&mut self) -> Result<()> {
        let names: Vec<&'static str> = self.plane_names().collect();
        for chroma in names {
            let fill = if chroma.starts_with('u') || chroma.starts_with('v') {
                0x80
            } else {
                0x00
            };
            let mut view = self.plane_write(chroma, 0, 0, -1, -1)?;
            for row in view.rows_mut() {
                row.fill(fill);
            }
        }
        Ok(())
    }

    /// Copy the visible window of `src` into this picture at
    /// `(hoff, voff)`. Both pictures must come from managers with the
    /// same plane table.
    pub fn blit(&mut self, src: &UbufPic, hoff: i64, voff: i64) -> Result<()> {
        let (src_w, src_h, _) = src.size();
        let names: Vec<&'static str> = self.plane_names().collect();
        for chroma in names {
            let src_view = src.plane_read(chroma, 0, 0, -1, -1)?;
            let mut dst_view =
                self.plane_write(chroma, hoff, voff, src_w as i64, src_h as i64)?;
            if src_view.width_bytes != dst_view.width_bytes
                || src_view.lines != dst_view.lines
            {
                return Err(Error::Invalid);
            }
            let width = dst_view.width_bytes;
            let src_stride = src_view.stride;
            let dst_stride = dst_view.stride;
            for line in 0..src_view.lines {
                let s = &src_view.data[line * src_stride..line * src_stride + width];
                let d = &mut dst_view.data[line * dst_stride..line * dst_stride + width];
                d.copy_from_slice(s);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Factory for picture buffers of one pixel format.
pub struct UbufPicMgr {
    umem_mgr: Arc<dyn UmemMgr>,
    /// Pixels per macropixel (1 for planar formats).
    macropixel: usize,
    /// Margins, in pixels (horizontal) and lines (vertical).
    hprepend: usize,
    happend: usize,
    vprepend: usize,
    vappend: usize,
    /// Stride alignment in bytes.
    align: usize,
    planes: Vec<PlaneDesc>,
    weak_self: std::sync::Weak<UbufPicMgr>,
}

impl UbufPicMgr {
    /// Create a manager.
    ///
    /// Margins must be compatible with every plane's subsampling (and the
    /// macropixel width) so that windows never straddle a plane sample.
    pub fn new(
        umem_mgr: Arc<dyn UmemMgr>,
        macropixel: usize,
        hprepend: usize,
        happend: usize,
        vprepend: usize,
        vappend: usize,
        align: usize,
        planes: Vec<PlaneDesc>,
    ) -> Result<Arc<Self>> {
        if macropixel == 0 || planes.is_empty() || !align.is_power_of_two() {
            return Err(Error::Invalid);
        }
        for desc in &planes {
            let hstep = desc.hsub * macropixel;
            if desc.hsub == 0 || desc.vsub == 0 || desc.macropixel_size == 0 {
                return Err(Error::Invalid);
            }
            if hprepend % hstep != 0
                || happend % hstep != 0
                || vprepend % desc.vsub != 0
                || vappend % desc.vsub != 0
            {
                return Err(Error::Invalid);
            }
        }
        Ok(Arc::new_cyclic(|weak| Self {
            umem_mgr,
            macropixel,
            hprepend,
            happend,
            vprepend,
            vappend,
            align,
            planes,
            weak_self: weak.clone(),
        }))
    }

    /// Planar 4:2:0 8-bit convenience manager ("y8", "u8", "v8"),
    /// no margins, stride alignment `align`.
    pub fn yuv420(umem_mgr: Arc<dyn UmemMgr>, align: usize) -> Result<Arc<Self>> {
        Self::new(
            umem_mgr,
            1,
            0,
            0,
            0,
            0,
            align,
            vec![
                PlaneDesc::new("y8", 1, 1, 1),
                PlaneDesc::new("u8", 2, 2, 1),
                PlaneDesc::new("v8", 2, 2, 1),
            ],
        )
    }

    fn plane(&self, chroma: &str) -> Result<(usize, &PlaneDesc)> {
        self.planes
            .iter()
            .enumerate()
            .find(|(_, p)| p.chroma == chroma)
            .ok_or(Error::Invalid)
    }

    /// Allocate a picture with a visible window of `hsize` × `vsize`
    /// pixels, surrounded by the manager's margins.
    pub fn alloc(&self, hsize: usize, vsize: usize) -> Result<UbufPic> {
        let this = self.weak_self.upgrade().ok_or(Error::Alloc)?;
        let alloc_hsize = self.hprepend + hsize + self.happend;
        let alloc_vsize = self.vprepend + vsize + self.vappend;
        for desc in &self.planes {
            let hstep = desc.hsub * self.macropixel;
            if hsize % hstep != 0 || vsize % desc.vsub != 0 {
                return Err(Error::Invalid);
            }
        }

        let mut planes = Vec::with_capacity(self.planes.len());
        let mut total = 0usize;
        for desc in &self.planes {
            let hstep = desc.hsub * self.macropixel;
            let stride = ((alloc_hsize / hstep) * desc.macropixel_size)
                .next_multiple_of(self.align);
            planes.push(PlaneGeo {
                offset: total,
                stride,
            });
            total += stride * (alloc_vsize / desc.vsub);
        }

        let slab = this.umem_mgr.alloc(total)?;
        Ok(UbufPic {
            mgr: this,
            slab: Arc::new(slab),
            planes,
            alloc_hsize,
            alloc_vsize,
            hoffset: self.hprepend,
            voffset: self.vprepend,
            hsize,
            vsize,
        })
    }

    /// Deep-copy the visible window of `src`, shifted by the same resize
    /// parameters, into a freshly allocated picture. This is the copying
    /// fallback when [`UbufPic::resize`] exceeds the margins.
    pub fn copy(
        &self,
        src: &UbufPic,
        lskip: i64,
        tskip: i64,
        new_hsize: i64,
        new_vsize: i64,
    ) -> Result<UbufPic> {
        let mut window = src.dup();
        window.resize(lskip, tskip, new_hsize, new_vsize)?;
        let (w, h, _) = window.size();
        let mut fresh = self.alloc(w, h)?;
        fresh.blit(&window, 0, 0)?;
        Ok(fresh)
    }
}

impl std::fmt::Debug for UbufPicMgr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UbufPicMgr")
            .field("macropixel", &self.macropixel)
            .field("planes", &self.planes.len())
            .field("align", &self.align)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::umem::UmemAllocMgr;

    fn i420(align: usize) -> Arc<UbufPicMgr> {
        UbufPicMgr::yuv420(UmemAllocMgr::new(), align).unwrap()
    }

    fn i420_margins() -> Arc<UbufPicMgr> {
        UbufPicMgr::new(
            UmemAllocMgr::new(),
            1,
            4,
            4,
            2,
            2,
            1,
            vec![
                PlaneDesc::new("y8", 1, 1, 1),
                PlaneDesc::new("u8", 2, 2, 1),
                PlaneDesc::new("v8", 2, 2, 1),
            ],
        )
        .unwrap()
    }

    /// Fill the y plane with `row*width + col` (mod 256).
    fn fill_y(pic: &mut UbufPic) {
        let (w, _, _) = pic.size();
        let mut view = pic.plane_write("y8", 0, 0, -1, -1).unwrap();
        for (row_idx, row) in view.rows_mut().enumerate() {
            for (col_idx, px) in row.iter_mut().enumerate() {
                *px = ((row_idx * w + col_idx) & 0xff) as u8;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Geometry
    // -----------------------------------------------------------------------

    #[test]
    fn test_alloc_size_and_planes() {
        let pic = i420(1).alloc(32, 16).unwrap();
        assert_eq!(pic.size(), (32, 16, 1));
        let names: Vec<_> = pic.plane_names().collect();
        assert_eq!(names, ["y8", "u8", "v8"]);
        let (stride, hsub, vsub, mpsize) = pic.plane_size("u8").unwrap();
        assert_eq!((stride, hsub, vsub, mpsize), (16, 2, 2, 1));
    }

    #[test]
    fn test_stride_alignment() {
        let pic = i420(64).alloc(10, 2).unwrap();
        let (stride, ..) = pic.plane_size("y8").unwrap();
        assert_eq!(stride, 64);
        let (stride_u, ..) = pic.plane_size("u8").unwrap();
        assert_eq!(stride_u, 64);
    }

    #[test]
    fn test_alloc_rejects_odd_sizes() {
        assert_eq!(i420(1).alloc(31, 16).err(), Some(Error::Invalid));
        assert_eq!(i420(1).alloc(32, 15).err(), Some(Error::Invalid));
    }

    #[test]
    fn test_unknown_plane() {
        let pic = i420(1).alloc(4, 4).unwrap();
        assert_eq!(pic.plane_size("a8").err(), Some(Error::Invalid));
    }

    // -----------------------------------------------------------------------
    // Mapping
    // -----------------------------------------------------------------------

    #[test]
    fn test_write_then_read_rect() {
        let mut pic = i420(1).alloc(8, 4).unwrap();
        fill_y(&mut pic);
        let view = pic.plane_read("y8", 2, 1, 4, 2).unwrap();
        assert_eq!(view.lines, 2);
        assert_eq!(view.width_bytes, 4);
        let rows: Vec<Vec<u8>> = view.rows().map(<[u8]>::to_vec).collect();
        assert_eq!(rows[0], vec![10, 11, 12, 13]);
        assert_eq!(rows[1], vec![18, 19, 20, 21]);
    }

    #[test]
    fn test_negative_coordinates_address_far_edge() {
        let mut pic = i420(1).alloc(8, 4).unwrap();
        fill_y(&mut pic);
        // Last two columns of the last row.
        let view = pic.plane_read("y8", -2, -1, 2, 1).unwrap();
        let row: Vec<u8> = view.rows().next().unwrap().to_vec();
        assert_eq!(row, vec![30, 31]);
    }

    #[test]
    fn test_write_on_shared_is_busy() {
        let mut pic = i420(1).alloc(4, 4).unwrap();
        let dup = pic.dup();
        assert!(!pic.is_writable());
        assert_eq!(
            pic.plane_write("y8", 0, 0, -1, -1).err(),
            Some(Error::Busy)
        );
        drop(dup);
        assert!(pic.plane_write("y8", 0, 0, -1, -1).is_ok());
    }

    #[test]
    fn test_chroma_rect_must_align() {
        let pic = i420(1).alloc(8, 4).unwrap();
        // Odd horizontal offset cannot be addressed on the u plane.
        assert_eq!(pic.plane_read("u8", 1, 0, 2, 2).err(), Some(Error::Invalid));
        assert!(pic.plane_read("y8", 1, 0, 2, 2).is_ok());
    }

    // -----------------------------------------------------------------------
    // Resize window
    // -----------------------------------------------------------------------

    #[test]
    fn test_crop_scenario() {
        let mgr = i420(1);
        let mut pic = mgr.alloc(32, 32).unwrap();
        fill_y(&mut pic);
        pic.resize(2, 2, -1, -1).unwrap();
        assert_eq!(pic.size(), (30, 30, 1));
        pic.resize(0, 0, 28, 28).unwrap();
        assert_eq!(pic.size(), (28, 28, 1));
        let view = pic.plane_read("y8", 0, 0, -1, -1).unwrap();
        let first = view.rows().next().unwrap()[0];
        assert_eq!(first, 2 * 32 + 2);
    }

    #[test]
    fn test_resize_roundtrip_restores_region() {
        let mgr = i420_margins();
        let mut pic = mgr.alloc(8, 4).unwrap();
        fill_y(&mut pic);
        let before = pic
            .plane_read("y8", 0, 0, -1, -1)
            .unwrap()
            .rows()
            .map(<[u8]>::to_vec)
            .collect::<Vec<_>>();

        // Grow into margins, then shrink back.
        pic.resize(-2, -2, 8 + 2 + 2, 4 + 2 + 2).unwrap();
        assert_eq!(pic.size(), (12, 8, 1));
        pic.resize(2, 2, 8, 4).unwrap();

        let after = pic
            .plane_read("y8", 0, 0, -1, -1)
            .unwrap()
            .rows()
            .map(<[u8]>::to_vec)
            .collect::<Vec<_>>();
        assert_eq!(before, after);
    }

    #[test]
    fn test_resize_beyond_margins_fails_and_preserves_window() {
        let mgr = i420(1);
        let mut pic = mgr.alloc(8, 4).unwrap();
        assert_eq!(pic.resize(-2, 0, -1, -1).err(), Some(Error::Invalid));
        assert_eq!(pic.size(), (8, 4, 1));
    }

    #[test]
    fn test_resize_odd_origin_rejected_for_chroma() {
        let mgr = i420_margins();
        let mut pic = mgr.alloc(8, 4).unwrap();
        // Origin would land between u-plane samples.
        assert_eq!(pic.resize(-1, 0, -1, -1).err(), Some(Error::Invalid));
    }

    #[test]
    fn test_copy_fallback_when_margins_exhausted() {
        let mgr = i420(1);
        let mut pic = mgr.alloc(8, 4).unwrap();
        fill_y(&mut pic);
        // No margins: zero-copy grow fails, copy path succeeds with a
        // smaller window.
        assert!(pic.resize(-2, 0, -1, -1).is_err());
        let copy = mgr.copy(&pic, 2, 2, 4, 2).unwrap();
        assert_eq!(copy.size(), (4, 2, 1));
        let view = copy.plane_read("y8", 0, 0, -1, -1).unwrap();
        assert_eq!(view.rows().next().unwrap()[0], 2 * 8 + 2);
    }

    // -----------------------------------------------------------------------
    // Derived primitives
    // -----------------------------------------------------------------------

    #[test]
    fn test_clear_uses_mid_chroma() {
        let mut pic = i420(1).alloc(4, 4).unwrap();
        pic.clear().unwrap();
        let y = pic.plane_read("y8", 0, 0, -1, -1).unwrap();
        assert!(y.rows().all(|r| r.iter().all(|&b| b == 0x00)));
        let u = pic.plane_read("u8", 0, 0, -1, -1).unwrap();
        assert!(u.rows().all(|r| r.iter().all(|&b| b == 0x80)));
    }

    #[test]
    fn test_blit_copies_window() {
        let mgr = i420(1);
        let mut src = mgr.alloc(4, 2).unwrap();
        fill_y(&mut src);
        src.plane_write("u8", 0, 0, -1, -1)
            .unwrap()
            .rows_mut()
            .for_each(|r| r.fill(0x42));
        src.plane_write("v8", 0, 0, -1, -1)
            .unwrap()
            .rows_mut()
            .for_each(|r| r.fill(0x43));

        let mut dst = mgr.alloc(8, 4).unwrap();
        dst.clear().unwrap();
        dst.blit(&src, 4, 2).unwrap();
        let y = dst.plane_read("y8", 4, 2, 4, 2).unwrap();
        let rows: Vec<Vec<u8>> = y.rows().map(<[u8]>::to_vec).collect();
        assert_eq!(rows[0], vec![0, 1, 2, 3]);
        assert_eq!(rows[1], vec![4, 5, 6, 7]);
        let u = dst.plane_read("u8", 4, 2, 4, 2).unwrap();
        assert!(u.rows().all(|r| r.iter().all(|&b| b == 0x42)));
    }
}
