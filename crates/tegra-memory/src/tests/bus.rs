use pretty_assertions::assert_eq;

use crate::bus::{GuestBus, MemoryBus};
use crate::phys::{DenseMemory, GuestMemory, SparseMemory};

#[test]
fn words_land_little_endian_in_ram() {
    let mut bus = GuestBus::new(DenseMemory::new(0x100).unwrap());

    bus.write_u32(0x10, 0xAABB_CCDD);

    let mut bytes = [0u8; 4];
    bus.ram().read_into(0x10, &mut bytes).unwrap();
    assert_eq!(bytes, [0xDD, 0xCC, 0xBB, 0xAA]);
    assert_eq!(bus.read_u32(0x10), 0xAABB_CCDD);
}

#[test]
fn reads_past_ram_are_open_bus() {
    let mut bus = GuestBus::new(DenseMemory::new(0x10).unwrap());

    assert_eq!(bus.read_u32(0x0E), 0xFFFF_FFFF);
    assert_eq!(bus.read_u32(u64::MAX - 1), 0xFFFF_FFFF);

    let mut buf = [0u8; 3];
    bus.read_physical(0x0F, &mut buf);
    assert_eq!(buf, [0xFF; 3]);
}

#[test]
fn writes_past_ram_are_dropped_whole() {
    let mut bus = GuestBus::new(SparseMemory::with_chunk_size(0x20, 0x10).unwrap());

    // The in-range half of a straddling write is not applied either.
    bus.write_u32(0x1E, 0xDEAD_BEEF);
    bus.write_u32(0x40, 0xDEAD_BEEF);

    assert_eq!(bus.ram().allocated_chunks(), 0);
    assert_eq!(bus.ram().read_u32_le(0x1C).unwrap(), 0);
}

#[test]
fn mut_ref_forwards_to_inner_bus() {
    fn upload(mut bus: impl MemoryBus) {
        bus.write_u32(8, 0x0102_0304);
    }

    let mut bus = GuestBus::new(DenseMemory::new(0x20).unwrap());
    upload(&mut bus);
    assert_eq!(bus.into_inner().read_u32_le(8).unwrap(), 0x0102_0304);
}
