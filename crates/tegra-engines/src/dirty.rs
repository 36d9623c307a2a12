//! Dirty-state tracking for state derived from guest memory.

pub const NUM_VERTEX_ARRAYS: usize = 32;

const ALL_VERTEX_ARRAYS: u32 = u32::MAX;

/// Receives a notification whenever an engine writes guest memory.
pub trait DirtyTracker {
    fn on_memory_write(&mut self);
}

impl<T: DirtyTracker + ?Sized> DirtyTracker for &mut T {
    #[inline]
    fn on_memory_write(&mut self) {
        <T as DirtyTracker>::on_memory_write(&mut **self)
    }
}

/// Dirty flags of the 3D pipeline.
///
/// Everything starts dirty so that the first draw uploads all state. A memory write by any engine
/// may have modified vertex data, so it re-dirties every vertex array; the attribute format lives
/// in registers and is unaffected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtyFlags {
    pub vertex_attrib_format: bool,
    vertex_array: u32,
}

impl Default for DirtyFlags {
    fn default() -> Self {
        Self {
            vertex_attrib_format: true,
            vertex_array: ALL_VERTEX_ARRAYS,
        }
    }
}

impl DirtyFlags {
    pub fn is_vertex_array_dirty(&self, index: usize) -> bool {
        index < NUM_VERTEX_ARRAYS && self.vertex_array & (1 << index) != 0
    }

    pub fn any_vertex_array_dirty(&self) -> bool {
        self.vertex_array != 0
    }

    /// Marks a vertex array as re-derived. Out-of-range indices are ignored.
    pub fn clear_vertex_array(&mut self, index: usize) {
        if index < NUM_VERTEX_ARRAYS {
            self.vertex_array &= !(1 << index);
        }
    }

    pub fn clear_all(&mut self) {
        self.vertex_attrib_format = false;
        self.vertex_array = 0;
    }
}

impl DirtyTracker for DirtyFlags {
    fn on_memory_write(&mut self) {
        self.vertex_array = ALL_VERTEX_ARRAYS;
    }
}
