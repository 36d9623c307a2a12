use thiserror::Error;

use crate::regs::RegisterError;

/// Why a transfer was refused as outside the supported (linear, origin-anchored) mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransferModeFault {
    #[error("exec.linear is clear (block-linear uploads are not supported)")]
    NonLinear,
    #[error("destination origin is ({x}, {y}, {z}), expected (0, 0, 0)")]
    NonZeroOrigin { x: u32, y: u32, z: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Register(#[from] RegisterError),

    #[error("unsupported upload at method 0x{method:x} (dest=0x{gpu_addr:x}+{offset}w): {fault}")]
    UnsupportedTransferMode {
        method: u32,
        gpu_addr: u64,
        offset: u64,
        fault: TransferModeFault,
    },

    #[error("GPU address 0x{gpu_addr:x} is not mapped (method=0x{method:x}, offset={offset})")]
    InvalidAddress {
        method: u32,
        gpu_addr: u64,
        offset: u64,
    },

    #[error("compute launch is not supported (method=0x{method:x})")]
    ComputeLaunchUnsupported { method: u32 },
}
