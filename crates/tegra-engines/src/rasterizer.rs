//! Interface between the engines and the rasterizer's surface cache.
//!
//! All addresses here are guest physical addresses. Engines that write guest memory directly
//! must call [`RasterizerCache::invalidate_region`] for the written range *before* the write
//! lands: a cached surface covering that range may be dirty, and writing it back later would
//! clobber the new data.

/// Cache of GPU-visible surfaces backed by guest memory.
pub trait RasterizerCache {
    /// Drops every cached representation overlapping `addr..addr + size` without writing it back.
    fn invalidate_region(&mut self, addr: u64, size: u64);

    /// Writes back every dirty cached representation overlapping `addr..addr + size`.
    fn flush_region(&mut self, addr: u64, size: u64);

    fn flush_and_invalidate_region(&mut self, addr: u64, size: u64) {
        self.flush_region(addr, size);
        self.invalidate_region(addr, size);
    }
}

impl<T: RasterizerCache + ?Sized> RasterizerCache for Box<T> {
    fn invalidate_region(&mut self, addr: u64, size: u64) {
        (**self).invalidate_region(addr, size)
    }

    fn flush_region(&mut self, addr: u64, size: u64) {
        (**self).flush_region(addr, size)
    }

    fn flush_and_invalidate_region(&mut self, addr: u64, size: u64) {
        (**self).flush_and_invalidate_region(addr, size)
    }
}

/// Rasterizer without a cache.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRasterizer;

impl RasterizerCache for NullRasterizer {
    fn invalidate_region(&mut self, _addr: u64, _size: u64) {}

    fn flush_region(&mut self, _addr: u64, _size: u64) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedSurface {
    pub addr: u64,
    pub size: u64,
    /// The cached copy holds writes that guest memory does not have yet.
    pub dirty: bool,
}

impl CachedSurface {
    fn end(&self) -> u64 {
        self.addr.saturating_add(self.size)
    }

    fn overlaps(&self, addr: u64, size: u64) -> bool {
        addr < self.end() && self.addr < addr.saturating_add(size)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub invalidations: u64,
    pub invalidated_surfaces: u64,
    /// Dirty surfaces dropped by an invalidation, losing their pending writes.
    pub discarded_dirty_surfaces: u64,
    pub flushes: u64,
    pub written_back_surfaces: u64,
}

/// Region-tracking surface cache.
///
/// Surfaces are tracked by physical range only; the pixel data itself lives with the renderer.
#[derive(Debug, Default, Clone)]
pub struct SurfaceCache {
    surfaces: Vec<CachedSurface>,
    stats: CacheStats,
}

impl SurfaceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a clean surface. Empty surfaces are ignored.
    pub fn register_surface(&mut self, addr: u64, size: u64) {
        if size == 0 {
            return;
        }
        self.surfaces.push(CachedSurface {
            addr,
            size,
            dirty: false,
        });
    }

    /// Marks the surface starting at `addr` as modified by the renderer.
    ///
    /// Returns `false` if no surface starts at `addr`.
    pub fn mark_dirty(&mut self, addr: u64) -> bool {
        match self.surfaces.iter_mut().find(|s| s.addr == addr) {
            Some(surface) => {
                surface.dirty = true;
                true
            }
            None => false,
        }
    }

    pub fn surfaces(&self) -> &[CachedSurface] {
        &self.surfaces
    }

    pub fn is_cached(&self, addr: u64) -> bool {
        self.surfaces.iter().any(|s| s.overlaps(addr, 1))
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}

impl RasterizerCache for SurfaceCache {
    fn invalidate_region(&mut self, addr: u64, size: u64) {
        if size == 0 {
            return;
        }
        self.stats.invalidations += 1;

        let before = self.surfaces.len();
        let mut discarded_dirty = 0;
        self.surfaces.retain(|s| {
            let hit = s.overlaps(addr, size);
            if hit && s.dirty {
                discarded_dirty += 1;
            }
            !hit
        });
        let dropped = (before - self.surfaces.len()) as u64;

        if dropped != 0 {
            tracing::trace!(addr, size, dropped, "invalidated cached surfaces");
        }
        self.stats.invalidated_surfaces += dropped;
        self.stats.discarded_dirty_surfaces += discarded_dirty;
    }

    fn flush_region(&mut self, addr: u64, size: u64) {
        if size == 0 {
            return;
        }
        self.stats.flushes += 1;

        for surface in self
            .surfaces
            .iter_mut()
            .filter(|s| s.dirty && s.overlaps(addr, size))
        {
            surface.dirty = false;
            self.stats.written_back_surfaces += 1;
        }
    }
}
