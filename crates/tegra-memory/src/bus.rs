use crate::phys::GuestMemory;

/// Word-level view of guest physical memory used by engines that write it directly.
///
/// Bus accesses cannot fail. What happens to an access that decodes to nothing is up to the
/// implementation; [`GuestBus`] drops writes and reads open bus.
pub trait MemoryBus {
    fn read_physical(&mut self, paddr: u64, buf: &mut [u8]);
    fn write_physical(&mut self, paddr: u64, buf: &[u8]);

    fn read_u32(&mut self, paddr: u64) -> u32 {
        let mut word = [0u8; 4];
        self.read_physical(paddr, &mut word);
        u32::from_le_bytes(word)
    }

    fn write_u32(&mut self, paddr: u64, value: u32) {
        self.write_physical(paddr, &value.to_le_bytes());
    }
}

impl<T: MemoryBus + ?Sized> MemoryBus for &mut T {
    #[inline]
    fn read_physical(&mut self, paddr: u64, buf: &mut [u8]) {
        <T as MemoryBus>::read_physical(&mut **self, paddr, buf)
    }

    #[inline]
    fn write_physical(&mut self, paddr: u64, buf: &[u8]) {
        <T as MemoryBus>::write_physical(&mut **self, paddr, buf)
    }
}

/// [`MemoryBus`] adapter over any [`GuestMemory`] backend.
///
/// Accesses that fall (even partially) outside the backing RAM are not performed: reads return
/// all-ones and writes are dropped. Both cases are logged at `warn`.
#[derive(Debug, Clone)]
pub struct GuestBus<M> {
    ram: M,
}

impl<M: GuestMemory> GuestBus<M> {
    pub fn new(ram: M) -> Self {
        Self { ram }
    }

    pub fn ram(&self) -> &M {
        &self.ram
    }

    pub fn ram_mut(&mut self) -> &mut M {
        &mut self.ram
    }

    pub fn into_inner(self) -> M {
        self.ram
    }
}

impl<M: GuestMemory> MemoryBus for GuestBus<M> {
    fn read_physical(&mut self, paddr: u64, buf: &mut [u8]) {
        if let Err(err) = self.ram.read_into(paddr, buf) {
            tracing::warn!(paddr, len = buf.len(), "open-bus read: {err}");
            buf.fill(0xFF);
        }
    }

    fn write_physical(&mut self, paddr: u64, buf: &[u8]) {
        if let Err(err) = self.ram.write_from(paddr, buf) {
            tracing::warn!(paddr, len = buf.len(), "dropping write: {err}");
        }
    }
}
