use std::cell::RefCell;
use std::rc::Rc;

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use tegra_engines::kepler_memory::{
    NUM_REGS, REG_DATA, REG_DEST_ADDRESS_HIGH, REG_DEST_ADDRESS_LOW, REG_DEST_X, REG_DEST_Y,
    REG_DEST_Z, REG_EXEC, REG_LINE_COUNT,
};
use tegra_engines::{
    AddressTranslator, DirtyTracker, EngineContext, EngineError, ExecFlags, KeplerMemory,
    MemoryBus, MethodCall, RasterizerCache, RegisterError, TransferModeFault,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Translate(u64),
    Invalidate { addr: u64, size: u64 },
    Flush { addr: u64, size: u64 },
    Write { addr: u64, value: u32 },
    Notify,
}

type Log = Rc<RefCell<Vec<Event>>>;

/// Maps a single GPU window `gpu_base..gpu_base + size` onto `cpu_base`.
struct WindowTranslator {
    log: Log,
    gpu_base: u64,
    cpu_base: u64,
    size: u64,
}

impl AddressTranslator for WindowTranslator {
    fn translate(&self, gpu_addr: u64) -> Option<u64> {
        self.log.borrow_mut().push(Event::Translate(gpu_addr));
        let offset = gpu_addr.checked_sub(self.gpu_base)?;
        (offset < self.size).then(|| self.cpu_base + offset)
    }
}

struct RecordingCache(Log);

impl RasterizerCache for RecordingCache {
    fn invalidate_region(&mut self, addr: u64, size: u64) {
        self.0.borrow_mut().push(Event::Invalidate { addr, size });
    }

    fn flush_region(&mut self, addr: u64, size: u64) {
        self.0.borrow_mut().push(Event::Flush { addr, size });
    }
}

struct RecordingMemory(Log);

impl MemoryBus for RecordingMemory {
    fn read_physical(&mut self, _paddr: u64, buf: &mut [u8]) {
        buf.fill(0);
    }

    fn write_physical(&mut self, paddr: u64, buf: &[u8]) {
        let value = u32::from_le_bytes(buf.try_into().expect("engine writes whole words"));
        self.0.borrow_mut().push(Event::Write { addr: paddr, value });
    }
}

struct RecordingDirty(Log);

impl DirtyTracker for RecordingDirty {
    fn on_memory_write(&mut self) {
        self.0.borrow_mut().push(Event::Notify);
    }
}

struct Harness {
    log: Log,
    translator: WindowTranslator,
    cache: RecordingCache,
    memory: RecordingMemory,
    dirty: RecordingDirty,
    engine: KeplerMemory,
}

impl Harness {
    /// GPU `0x1000..0x1000 + size` is backed by CPU `0x10_1000..`.
    fn new(size: u64) -> Self {
        let log: Log = Rc::default();
        Self {
            translator: WindowTranslator {
                log: log.clone(),
                gpu_base: 0x1000,
                cpu_base: 0x10_1000,
                size,
            },
            cache: RecordingCache(log.clone()),
            memory: RecordingMemory(log.clone()),
            dirty: RecordingDirty(log.clone()),
            log,
            engine: KeplerMemory::new(),
        }
    }

    fn call(&mut self, method: u32, argument: u32) -> Result<(), EngineError> {
        let mut ctx = EngineContext {
            memory_manager: &self.translator,
            rasterizer: &mut self.cache,
            memory: &mut self.memory,
            dirty: &mut self.dirty,
        };
        self.engine
            .call_method(&MethodCall::single(method, argument), &mut ctx)
    }

    fn set_dest(&mut self, gpu_addr: u64) {
        self.call(REG_DEST_ADDRESS_HIGH, (gpu_addr >> 32) as u32).unwrap();
        self.call(REG_DEST_ADDRESS_LOW, gpu_addr as u32).unwrap();
    }

    fn start_linear(&mut self, gpu_addr: u64) {
        self.set_dest(gpu_addr);
        self.call(REG_EXEC, ExecFlags::LINEAR.bits()).unwrap();
    }

    fn take_events(&self) -> Vec<Event> {
        std::mem::take(&mut *self.log.borrow_mut())
    }
}

fn word_events(gpu_addr: u64, cpu_addr: u64, value: u32) -> [Event; 4] {
    [
        Event::Translate(gpu_addr),
        Event::Invalidate {
            addr: cpu_addr,
            size: 4,
        },
        Event::Write {
            addr: cpu_addr,
            value,
        },
        Event::Notify,
    ]
}

#[test]
fn three_word_upload_lands_in_order_with_invalidate_first() {
    let mut h = Harness::new(0x1000);
    h.start_linear(0x1000);

    for value in [0xAAAA, 0xBBBB, 0xCCCC] {
        h.call(REG_DATA, value).unwrap();
    }

    let expected: Vec<Event> = [
        word_events(0x1000, 0x10_1000, 0xAAAA),
        word_events(0x1004, 0x10_1004, 0xBBBB),
        word_events(0x1008, 0x10_1008, 0xCCCC),
    ]
    .concat();
    assert_eq!(h.take_events(), expected);
    assert_eq!(h.engine.write_offset(), 3);
}

#[test]
fn exec_resets_offset_whatever_its_value() {
    let mut h = Harness::new(0x1000);
    for words in [0u32, 1, 7, 64] {
        h.start_linear(0x1000);
        for i in 0..words {
            h.call(REG_DATA, i).unwrap();
        }
        assert_eq!(h.engine.write_offset(), u64::from(words));

        h.call(REG_EXEC, ExecFlags::LINEAR.bits()).unwrap();
        assert_eq!(h.engine.write_offset(), 0);
    }

    h.take_events();
    h.call(REG_DATA, 0x1234).unwrap();
    assert_eq!(
        h.take_events(),
        word_events(0x1000, 0x10_1000, 0x1234).to_vec()
    );
}

#[test]
fn non_exec_methods_do_not_touch_offset() {
    let mut h = Harness::new(0x1000);
    h.start_linear(0x1000);
    h.call(REG_DATA, 1).unwrap();

    h.call(REG_LINE_COUNT, 9).unwrap();
    h.set_dest(0x1800);

    assert_eq!(h.engine.write_offset(), 1);
    h.take_events();
    h.call(REG_DATA, 2).unwrap();
    assert_eq!(h.take_events(), word_events(0x1804, 0x10_1804, 2).to_vec());
}

#[test]
fn non_linear_exec_fails_every_data_write_without_side_effects() {
    let mut h = Harness::new(0x1000);
    h.set_dest(0x1000);
    h.call(REG_EXEC, 0).unwrap();

    for value in 0..3 {
        let err = h.call(REG_DATA, value).unwrap_err();
        assert_eq!(
            err,
            EngineError::UnsupportedTransferMode {
                method: REG_DATA,
                gpu_addr: 0x1000,
                offset: 0,
                fault: TransferModeFault::NonLinear,
            }
        );
    }
    assert_eq!(h.take_events(), Vec::<Event>::new());
    assert_eq!(h.engine.write_offset(), 0);
}

#[test]
fn data_before_any_exec_is_not_linear() {
    let mut h = Harness::new(0x1000);
    h.set_dest(0x1000);

    let err = h.call(REG_DATA, 1).unwrap_err();

    assert!(matches!(
        err,
        EngineError::UnsupportedTransferMode {
            fault: TransferModeFault::NonLinear,
            ..
        }
    ));
    assert_eq!(h.take_events(), Vec::<Event>::new());
}

#[test]
fn non_zero_origin_fails_like_non_linear() {
    for (reg, x, y, z) in [
        (REG_DEST_X, 1, 0, 0),
        (REG_DEST_Y, 0, 2, 0),
        (REG_DEST_Z, 0, 0, 3),
    ] {
        let mut h = Harness::new(0x1000);
        h.start_linear(0x1000);
        h.call(reg, x | y | z).unwrap();

        let err = h.call(REG_DATA, 0xFFFF).unwrap_err();

        assert_eq!(
            err,
            EngineError::UnsupportedTransferMode {
                method: REG_DATA,
                gpu_addr: 0x1000,
                offset: 0,
                fault: TransferModeFault::NonZeroOrigin { x, y, z },
            }
        );
        assert_eq!(h.take_events(), Vec::<Event>::new());
    }
}

#[test]
fn unmapped_destination_leaves_offset_and_memory_untouched() {
    let mut h = Harness::new(0x1000);
    h.start_linear(0x9000);

    let err = h.call(REG_DATA, 0xDEAD).unwrap_err();

    assert_eq!(
        err,
        EngineError::InvalidAddress {
            method: REG_DATA,
            gpu_addr: 0x9000,
            offset: 0,
        }
    );
    assert_eq!(h.take_events(), vec![Event::Translate(0x9000)]);
    assert_eq!(h.engine.write_offset(), 0);
}

#[test]
fn upload_running_off_the_mapping_stops_at_the_boundary() {
    let mut h = Harness::new(8);
    h.start_linear(0x1000);

    h.call(REG_DATA, 1).unwrap();
    h.call(REG_DATA, 2).unwrap();
    let err = h.call(REG_DATA, 3).unwrap_err();

    assert!(matches!(
        err,
        EngineError::InvalidAddress {
            gpu_addr: 0x1008,
            offset: 2,
            ..
        }
    ));
    assert_eq!(h.engine.write_offset(), 2);

    // A retry after the fault still targets the same word.
    h.take_events();
    assert!(h.call(REG_DATA, 3).is_err());
    assert_eq!(h.take_events(), vec![Event::Translate(0x1008)]);
}

#[test]
fn method_past_register_file_is_out_of_range() {
    let mut h = Harness::new(0x1000);
    let err = h.call(NUM_REGS as u32, 5).unwrap_err();

    assert_eq!(
        err,
        EngineError::Register(RegisterError::OutOfRange {
            index: NUM_REGS as u32,
            num_regs: NUM_REGS,
        })
    );
    assert_eq!(h.take_events(), Vec::<Event>::new());
}

#[test]
fn every_write_is_stored_even_when_the_transfer_fails() {
    let mut h = Harness::new(0x1000);
    h.call(0x10, 0x1234_5678).unwrap();
    assert!(h.call(REG_DATA, 0xFEED).is_err());

    assert_eq!(h.engine.regs().read(0x10), Ok(0x1234_5678));
    assert_eq!(h.engine.regs().read(REG_DATA), Ok(0xFEED));
}

proptest! {
    #[test]
    fn consecutive_data_writes_fill_consecutive_words(
        start_word in 0u64..0x100,
        values in proptest::collection::vec(any::<u32>(), 1..48),
    ) {
        let mut h = Harness::new(0x1000);
        let dest = 0x1000 + start_word * 4;
        h.start_linear(dest);

        for &value in &values {
            h.call(REG_DATA, value).unwrap();
        }

        let expected: Vec<Event> = values
            .iter()
            .enumerate()
            .flat_map(|(i, &value)| {
                let offset = 4 * i as u64;
                word_events(dest + offset, 0x10_0000 + dest + offset, value)
            })
            .collect();
        prop_assert_eq!(h.take_events(), expected);
        prop_assert_eq!(h.engine.write_offset(), values.len() as u64);
    }
}
