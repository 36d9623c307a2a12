//! Inline-to-memory engine (class `0xA140`).
//!
//! The command stream programs a destination in `dest`, writes `exec` to start an upload, then
//! streams the payload one word at a time through `data`. Each data word is written to
//! `dest.address() + 4 * write_offset` and advances the offset.
//!
//! Only linear uploads anchored at the destination origin are supported; anything else is
//! reported as [`EngineError::UnsupportedTransferMode`].

use bitflags::bitflags;
use tegra_memory::{AddressTranslator, MemoryBus};

use crate::dirty::DirtyTracker;
use crate::error::{EngineError, TransferModeFault};
use crate::method::MethodCall;
use crate::rasterizer::RasterizerCache;
use crate::regs::RegisterFile;

pub const NUM_REGS: usize = 0x7F;

pub const REG_LINE_LENGTH_IN: u32 = 0x60;
pub const REG_LINE_COUNT: u32 = 0x61;
pub const REG_DEST_ADDRESS_HIGH: u32 = 0x62;
pub const REG_DEST_ADDRESS_LOW: u32 = 0x63;
pub const REG_DEST_PITCH: u32 = 0x64;
pub const REG_DEST_BLOCK_DIMENSIONS: u32 = 0x65;
pub const REG_DEST_WIDTH: u32 = 0x66;
pub const REG_DEST_HEIGHT: u32 = 0x67;
pub const REG_DEST_DEPTH: u32 = 0x68;
pub const REG_DEST_Z: u32 = 0x69;
pub const REG_DEST_X: u32 = 0x6A;
pub const REG_DEST_Y: u32 = 0x6B;
pub const REG_EXEC: u32 = 0x6C;
pub const REG_DATA: u32 = 0x6D;

// `RegisterFile::get` indexes these unchecked.
const _: () = {
    let regs = [
        REG_LINE_LENGTH_IN,
        REG_LINE_COUNT,
        REG_DEST_ADDRESS_HIGH,
        REG_DEST_ADDRESS_LOW,
        REG_DEST_PITCH,
        REG_DEST_BLOCK_DIMENSIONS,
        REG_DEST_WIDTH,
        REG_DEST_HEIGHT,
        REG_DEST_DEPTH,
        REG_DEST_Z,
        REG_DEST_X,
        REG_DEST_Y,
        REG_EXEC,
        REG_DATA,
    ];
    let mut i = 0;
    while i < regs.len() {
        assert!((regs[i] as usize) < NUM_REGS);
        i += 1;
    }
};

const WORD_BYTES: u64 = 4;

bitflags! {
    /// Contents of the `exec` register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExecFlags: u32 {
        const LINEAR = 1 << 0;
    }
}

/// Typed view of the `dest` register block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DestRegs {
    pub address_high: u32,
    pub address_low: u32,
    pub pitch: u32,
    pub block_dimensions: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub z: u32,
    pub x: u32,
    pub y: u32,
}

impl DestRegs {
    /// GPU virtual address of the destination origin.
    pub fn address(&self) -> u64 {
        (u64::from(self.address_high) << 32) | u64::from(self.address_low)
    }

    fn origin_fault(&self) -> Option<TransferModeFault> {
        if self.x == 0 && self.y == 0 && self.z == 0 {
            return None;
        }
        Some(TransferModeFault::NonZeroOrigin {
            x: self.x,
            y: self.y,
            z: self.z,
        })
    }
}

/// Collaborators an engine may touch while executing a method.
///
/// They belong to the GPU and are shared by all of its engines; an engine only borrows them for
/// the duration of one call.
pub struct EngineContext<'a> {
    pub memory_manager: &'a dyn AddressTranslator,
    pub rasterizer: &'a mut dyn RasterizerCache,
    pub memory: &'a mut dyn MemoryBus,
    pub dirty: &'a mut dyn DirtyTracker,
}

#[derive(Debug, Clone, Default)]
struct UploadState {
    /// Offset of the next data word, in words.
    write_offset: u64,
}

#[derive(Debug, Clone, Default)]
pub struct KeplerMemory {
    regs: RegisterFile<NUM_REGS>,
    state: UploadState,
}

impl KeplerMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn regs(&self) -> &RegisterFile<NUM_REGS> {
        &self.regs
    }

    pub fn write_offset(&self) -> u64 {
        self.state.write_offset
    }

    pub fn exec(&self) -> ExecFlags {
        ExecFlags::from_bits_retain(self.regs.get(REG_EXEC))
    }

    pub fn dest(&self) -> DestRegs {
        DestRegs {
            address_high: self.regs.get(REG_DEST_ADDRESS_HIGH),
            address_low: self.regs.get(REG_DEST_ADDRESS_LOW),
            pitch: self.regs.get(REG_DEST_PITCH),
            block_dimensions: self.regs.get(REG_DEST_BLOCK_DIMENSIONS),
            width: self.regs.get(REG_DEST_WIDTH),
            height: self.regs.get(REG_DEST_HEIGHT),
            depth: self.regs.get(REG_DEST_DEPTH),
            z: self.regs.get(REG_DEST_Z),
            x: self.regs.get(REG_DEST_X),
            y: self.regs.get(REG_DEST_Y),
        }
    }

    /// Stores `call.argument` in the register file, then performs the register's side effect.
    ///
    /// The store happens even if the side effect fails.
    pub fn call_method(
        &mut self,
        call: &MethodCall,
        ctx: &mut EngineContext<'_>,
    ) -> Result<(), EngineError> {
        self.regs.write(call.method, call.argument)?;

        match call.method {
            REG_EXEC => {
                tracing::debug!(
                    exec = call.argument,
                    dest = self.dest().address(),
                    previous_offset = self.state.write_offset,
                    "inline-to-memory upload started"
                );
                self.state.write_offset = 0;
            }
            REG_DATA => self.process_data(call.method, call.argument, ctx)?,
            _ => {}
        }
        Ok(())
    }

    fn process_data(
        &mut self,
        method: u32,
        data: u32,
        ctx: &mut EngineContext<'_>,
    ) -> Result<(), EngineError> {
        let dest = self.dest();
        let offset = self.state.write_offset;

        let mode_fault = if self.exec().contains(ExecFlags::LINEAR) {
            dest.origin_fault()
        } else {
            Some(TransferModeFault::NonLinear)
        };
        if let Some(fault) = mode_fault {
            tracing::warn!(method, gpu_addr = dest.address(), offset, %fault, "unsupported upload");
            return Err(EngineError::UnsupportedTransferMode {
                method,
                gpu_addr: dest.address(),
                offset,
                fault,
            });
        }

        let gpu_addr = offset
            .checked_mul(WORD_BYTES)
            .and_then(|bytes| dest.address().checked_add(bytes));
        let Some((gpu_addr, paddr)) =
            gpu_addr.and_then(|va| ctx.memory_manager.translate(va).map(|pa| (va, pa)))
        else {
            let gpu_addr = dest.address().wrapping_add(offset.wrapping_mul(WORD_BYTES));
            tracing::warn!(method, gpu_addr, offset, "upload destination is not mapped");
            return Err(EngineError::InvalidAddress {
                method,
                gpu_addr,
                offset,
            });
        };

        // Evict cached surfaces first: one of them may be dirty and would otherwise be written
        // back over this word later.
        ctx.rasterizer.invalidate_region(paddr, WORD_BYTES);
        ctx.memory.write_u32(paddr, data);
        ctx.dirty.on_memory_write();

        tracing::trace!(gpu_addr, paddr, offset, data, "inline-to-memory word");
        self.state.write_offset += 1;
        Ok(())
    }
}
