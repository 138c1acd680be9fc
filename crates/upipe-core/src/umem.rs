//! Opaque byte-buffer arena with pooled backends.
//!
//! A [`UmemMgr`] maps a requested byte count to an allocated region whose
//! real capacity may exceed the request. [`UmemAllocMgr`] goes straight to
//! the heap; [`UmemPoolMgr`] keeps power-of-two size classes of recycled
//! buffers so payload-heavy pipelines stop hitting the allocator once warm.
//!
//! A [`Umem`] returns its backing storage to the manager that produced it
//! when dropped.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::upool::Upool;

/// Internal recycling half of a manager: takes ownership of a retired
/// backing buffer.
trait UmemRecycler: Send + Sync {
    fn recycle(&self, buf: Vec<u8>);
}

/// Allocator of opaque byte regions.
pub trait UmemMgr: Send + Sync {
    /// Allocate a region of at least `size` bytes. The visible size is
    /// exactly `size`; the real capacity may be larger.
    fn alloc(&self, size: usize) -> Result<Umem>;

    /// Drop every buffer currently cached, without touching live regions.
    fn vacuum(&self) {}
}

/// An allocated byte region.
///
/// Dereferences to `[u8]` of the requested size. [`Umem::resize`] grows
/// within the real capacity without copying, or migrates to a fresh
/// allocation from the same manager.
pub struct Umem {
    /// Backing storage, always of `real_size` length. Wrapped in `Option`
    /// so `Drop` can move it back to the recycler.
    buf: Option<Vec<u8>>,
    size: usize,
    recycler: Option<Arc<dyn UmemRecycler>>,
    mgr: Option<Arc<dyn UmemMgr>>,
}

impl Umem {
    fn new(
        buf: Vec<u8>,
        size: usize,
        recycler: Option<Arc<dyn UmemRecycler>>,
        mgr: Option<Arc<dyn UmemMgr>>,
    ) -> Self {
        debug_assert!(buf.len() >= size);
        Self {
            buf: Some(buf),
            size,
            recycler,
            mgr,
        }
    }

    /// Visible size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Actual capacity of the backing buffer.
    pub fn real_size(&self) -> usize {
        self.buf.as_ref().map_or(0, |b| b.len())
    }

    /// Change the visible size.
    ///
    /// Growing within the real capacity is free. Growing beyond it
    /// allocates a new region from the originating manager and copies the
    /// visible bytes; shrinking never migrates.
    pub fn resize(&mut self, new_size: usize) -> Result<()> {
        if new_size <= self.real_size() {
            self.size = new_size;
            return Ok(());
        }
        let mgr = self.mgr.clone().ok_or(Error::Alloc)?;
        let mut migrated = mgr.alloc(new_size)?;
        migrated[..self.size].copy_from_slice(&self[..]);
        std::mem::swap(self, &mut migrated);
        Ok(())
    }
}

impl std::ops::Deref for Umem {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.buf.as_ref().expect("umem backing present")[..self.size]
    }
}

impl std::ops::DerefMut for Umem {
    fn deref_mut(&mut self) -> &mut [u8] {
        let size = self.size;
        &mut self.buf.as_mut().expect("umem backing present")[..size]
    }
}

impl Drop for Umem {
    fn drop(&mut self) {
        if let (Some(buf), Some(recycler)) = (self.buf.take(), self.recycler.as_ref()) {
            recycler.recycle(buf);
        }
    }
}

impl std::fmt::Debug for Umem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Umem")
            .field("size", &self.size)
            .field("real_size", &self.real_size())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Plain heap manager
// ---------------------------------------------------------------------------

/// Manager allocating straight from the heap, with no recycling.
#[derive(Debug, Default)]
pub struct UmemAllocMgr;

impl UmemAllocMgr {
    /// Create a plain heap manager.
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl UmemMgr for UmemAllocMgr {
    fn alloc(&self, size: usize) -> Result<Umem> {
        Ok(Umem::new(vec![0u8; size], size, None, None))
    }
}

// ---------------------------------------------------------------------------
// Pooled manager
// ---------------------------------------------------------------------------

/// Manager recycling buffers through power-of-two size classes.
///
/// Class `i` holds buffers of `class0_size << i` bytes. Requests larger
/// than the last class fall through to the heap and are never recycled.
pub struct UmemPoolMgr {
    class0_size: usize,
    classes: Vec<Upool<Vec<u8>>>,
    weak_self: std::sync::Weak<UmemPoolMgr>,
}

impl UmemPoolMgr {
    /// Create a pooled manager.
    ///
    /// `class0_size` is the smallest class (must be a power of two);
    /// `depths[i]` is the maximum number of cached buffers in class `i`.
    pub fn new(class0_size: usize, depths: &[usize]) -> Arc<Self> {
        assert!(class0_size.is_power_of_two());
        Arc::new_cyclic(|weak| Self {
            class0_size,
            classes: depths.iter().map(|&d| Upool::new(d)).collect(),
            weak_self: weak.clone(),
        })
    }

    /// Create a pooled manager with the standard class ladder: 32 bytes up
    /// to 4 MiB, keeping `base_depth` buffers for small classes and
    /// progressively fewer for large ones.
    pub fn simple(base_depth: usize) -> Arc<Self> {
        let mut depths = Vec::with_capacity(18);
        for class in 0..18usize {
            let shift = match class {
                0..=7 => 0,   // 32 B .. 4 KiB
                8..=10 => 1,  // 8 KiB .. 32 KiB
                11..=14 => 2, // 64 KiB .. 512 KiB
                _ => 3,       // 1 MiB .. 4 MiB
            };
            depths.push(base_depth >> shift);
        }
        Self::new(32, &depths)
    }

    /// Class index and real buffer size for a request.
    fn class_for(&self, wanted: usize) -> (usize, usize) {
        let mut size = self.class0_size;
        for class in 0..self.classes.len() {
            if wanted <= size {
                return (class, size);
            }
            size <<= 1;
        }
        (self.classes.len(), wanted)
    }

    /// Number of buffers currently cached across all classes.
    pub fn cached(&self) -> usize {
        self.classes.iter().map(Upool::len).sum()
    }
}

impl UmemMgr for UmemPoolMgr {
    /// Allocate from the pool ladder. Buffers are handed out warm when a
    /// class has a cached entry, zeroed only on first allocation.
    fn alloc(&self, size: usize) -> Result<Umem> {
        let this = self.weak_self.upgrade().ok_or(Error::Alloc)?;
        let (class, real) = self.class_for(size);
        let buf = if class < self.classes.len() {
            self.classes[class].pop().unwrap_or_else(|| vec![0u8; real])
        } else {
            vec![0u8; real]
        };
        let recycler: Arc<dyn UmemRecycler> = Arc::clone(&this) as Arc<dyn UmemRecycler>;
        let mgr: Arc<dyn UmemMgr> = this as Arc<dyn UmemMgr>;
        Ok(Umem::new(buf, size, Some(recycler), Some(mgr)))
    }

    fn vacuum(&self) {
        for class in &self.classes {
            class.vacuum();
        }
    }
}

impl UmemRecycler for UmemPoolMgr {
    fn recycle(&self, buf: Vec<u8>) {
        let (class, real) = self.class_for(buf.len());
        // Only exact class-sized buffers go back; odd sizes came from the
        // heap fall-through.
        if class < self.classes.len() && buf.len() == real {
            let _ = self.classes[class].push(buf);
        }
    }
}
