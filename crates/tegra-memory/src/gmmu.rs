//! GPU virtual address space.
//!
//! GPU engines address memory through their own page-granular virtual address space. The
//! [`GpuMemoryManager`] owns the page table that maps GPU pages onto guest physical pages and is
//! the [`AddressTranslator`] every engine resolves its destination addresses through.

use std::collections::BTreeMap;

use thiserror::Error;

/// Default GPU page size is 64 KiB (big pages).
pub const DEFAULT_PAGE_BITS: u32 = 16;

/// Width of the GPU virtual address space.
pub const ADDRESS_SPACE_BITS: u32 = 40;

const ADDRESS_SPACE_END: u64 = 1 << ADDRESS_SPACE_BITS;

/// Resolves device-virtual addresses to guest physical addresses.
pub trait AddressTranslator {
    /// Returns the physical address backing `gpu_addr`, or `None` when the address is unmapped.
    fn translate(&self, gpu_addr: u64) -> Option<u64>;
}

impl<T: AddressTranslator + ?Sized> AddressTranslator for &T {
    #[inline]
    fn translate(&self, gpu_addr: u64) -> Option<u64> {
        <T as AddressTranslator>::translate(&**self, gpu_addr)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MapError {
    #[error("page size bits {0} out of range (12..=20)")]
    InvalidPageBits(u32),
    #[error("address 0x{addr:x} is not aligned to the 0x{page_size:x}-byte page size")]
    Misaligned { addr: u64, page_size: u64 },
    #[error("alignment 0x{0:x} is not a power of two")]
    InvalidAlignment(u64),
    #[error("cannot map an empty range")]
    EmptyRange,
    #[error("range 0x{gpu_addr:x}+0x{size:x} does not fit in the GPU address space")]
    OutOfAddressSpace { gpu_addr: u64, size: u64 },
    #[error("CPU range 0x{cpu_addr:x}+0x{size:x} wraps past the top of physical memory")]
    CpuRangeOverflow { cpu_addr: u64, size: u64 },
    #[error("no free GPU range of 0x{size:x} bytes")]
    NoFreeRange { size: u64 },
    #[error("GPU page 0x{gpu_addr:x} is already mapped")]
    AlreadyMapped { gpu_addr: u64 },
    #[error("GPU page 0x{gpu_addr:x} is not mapped")]
    NotMapped { gpu_addr: u64 },
}

/// Page table for the GPU virtual address space.
#[derive(Debug, Clone)]
pub struct GpuMemoryManager {
    page_bits: u32,
    /// GPU page number -> guest physical address of the page.
    page_table: BTreeMap<u64, u64>,
}

impl Default for GpuMemoryManager {
    fn default() -> Self {
        Self {
            page_bits: DEFAULT_PAGE_BITS,
            page_table: BTreeMap::new(),
        }
    }
}

impl GpuMemoryManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_bits(page_bits: u32) -> Result<Self, MapError> {
        if !(12..=20).contains(&page_bits) {
            return Err(MapError::InvalidPageBits(page_bits));
        }
        Ok(Self {
            page_bits,
            page_table: BTreeMap::new(),
        })
    }

    #[inline]
    pub fn page_size(&self) -> u64 {
        1 << self.page_bits
    }

    #[inline]
    fn page_mask(&self) -> u64 {
        self.page_size() - 1
    }

    pub fn mapped_pages(&self) -> usize {
        self.page_table.len()
    }

    fn check_aligned(&self, addr: u64) -> Result<(), MapError> {
        if addr & self.page_mask() != 0 {
            return Err(MapError::Misaligned {
                addr,
                page_size: self.page_size(),
            });
        }
        Ok(())
    }

    /// Returns the page count for `size` bytes and validates that `gpu_addr..gpu_addr + size`
    /// (rounded up to whole pages) lies inside the address space.
    fn page_span(&self, gpu_addr: u64, size: u64) -> Result<u64, MapError> {
        if size == 0 {
            return Err(MapError::EmptyRange);
        }
        let pages = size.div_ceil(self.page_size());
        let end = pages
            .checked_mul(self.page_size())
            .and_then(|span| span.checked_add(gpu_addr))
            .filter(|&end| end <= ADDRESS_SPACE_END);
        match end {
            Some(_) => Ok(pages),
            None => Err(MapError::OutOfAddressSpace { gpu_addr, size }),
        }
    }

    /// Maps `size` bytes of guest physical memory at `cpu_addr` to the GPU range starting at
    /// `gpu_addr`. Both addresses must be page aligned; `size` is rounded up to whole pages.
    pub fn map(&mut self, cpu_addr: u64, gpu_addr: u64, size: u64) -> Result<u64, MapError> {
        self.check_aligned(gpu_addr)?;
        self.check_aligned(cpu_addr)?;
        let pages = self.page_span(gpu_addr, size)?;
        let first = gpu_addr >> self.page_bits;

        // The last page must start at a representable physical address.
        if ((pages - 1) << self.page_bits).checked_add(cpu_addr).is_none() {
            return Err(MapError::CpuRangeOverflow { cpu_addr, size });
        }
        if let Some((&busy, _)) = self.page_table.range(first..first + pages).next() {
            return Err(MapError::AlreadyMapped {
                gpu_addr: busy << self.page_bits,
            });
        }

        for i in 0..pages {
            let cpu_page = cpu_addr + (i << self.page_bits);
            self.page_table.insert(first + i, cpu_page);
        }

        tracing::debug!(gpu_addr, cpu_addr, size, pages, "mapped GPU range");
        Ok(gpu_addr)
    }

    /// Maps `size` bytes at the lowest free GPU address aligned to `align` (at least one page).
    ///
    /// GPU address zero is never handed out so that a null GPU pointer always faults.
    pub fn map_allocate(&mut self, cpu_addr: u64, size: u64, align: u64) -> Result<u64, MapError> {
        if align != 0 && !align.is_power_of_two() {
            return Err(MapError::InvalidAlignment(align));
        }
        let align = align.max(self.page_size());
        let pages = size.div_ceil(self.page_size());
        if pages == 0 {
            return Err(MapError::EmptyRange);
        }

        let mut candidate =
            align_up(self.page_size(), align).ok_or(MapError::NoFreeRange { size })?;
        loop {
            let first = candidate >> self.page_bits;
            let end = first + pages;
            if end > ADDRESS_SPACE_END >> self.page_bits {
                return Err(MapError::NoFreeRange { size });
            }
            match self.page_table.range(first..end).next_back() {
                Some((&busy, _)) => {
                    candidate = align_up((busy + 1) << self.page_bits, align)
                        .ok_or(MapError::NoFreeRange { size })?;
                }
                None => break,
            }
        }

        self.map(cpu_addr, candidate, size)
    }

    /// Removes the mapping of every page in `gpu_addr..gpu_addr + size`.
    ///
    /// Fails without modifying the page table if any page in the range is not mapped.
    pub fn unmap(&mut self, gpu_addr: u64, size: u64) -> Result<(), MapError> {
        self.check_aligned(gpu_addr)?;
        let pages = self.page_span(gpu_addr, size)?;
        let first = gpu_addr >> self.page_bits;

        if let Some(missing) = (first..first + pages).find(|p| !self.page_table.contains_key(p)) {
            return Err(MapError::NotMapped {
                gpu_addr: missing << self.page_bits,
            });
        }
        for page in first..first + pages {
            self.page_table.remove(&page);
        }

        tracing::debug!(gpu_addr, size, pages, "unmapped GPU range");
        Ok(())
    }

    pub fn gpu_to_cpu_address(&self, gpu_addr: u64) -> Option<u64> {
        let page = gpu_addr >> self.page_bits;
        let base = self.page_table.get(&page)?;
        Some(base + (gpu_addr & self.page_mask()))
    }

    pub fn is_mapped(&self, gpu_addr: u64) -> bool {
        self.page_table.contains_key(&(gpu_addr >> self.page_bits))
    }
}

impl AddressTranslator for GpuMemoryManager {
    #[inline]
    fn translate(&self, gpu_addr: u64) -> Option<u64> {
        self.gpu_to_cpu_address(gpu_addr)
    }
}

fn align_up(value: u64, alignment: u64) -> Option<u64> {
    debug_assert!(alignment.is_power_of_two());
    value
        .checked_add(alignment - 1)
        .map(|v| v & !(alignment - 1))
}
