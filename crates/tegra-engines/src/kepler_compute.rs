//! Compute engine (class `0xB1C0`).
//!
//! Register state is recorded so it reads back, but launching a kernel is refused: kernels can
//! write arbitrary guest memory and nothing here executes them.

use crate::error::EngineError;
use crate::method::MethodCall;
use crate::regs::RegisterFile;

pub const NUM_REGS: usize = 0xCF8;

pub const REG_LAUNCH: u32 = 0xAF;

const _: () = assert!((REG_LAUNCH as usize) < NUM_REGS);

#[derive(Debug, Clone, Default)]
pub struct KeplerCompute {
    regs: RegisterFile<NUM_REGS>,
}

impl KeplerCompute {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn regs(&self) -> &RegisterFile<NUM_REGS> {
        &self.regs
    }

    pub fn call_method(&mut self, call: &MethodCall) -> Result<(), EngineError> {
        self.regs.write(call.method, call.argument)?;

        if call.method == REG_LAUNCH {
            tracing::warn!(method = call.method, "compute launch requested");
            return Err(EngineError::ComputeLaunchUnsupported {
                method: call.method,
            });
        }
        Ok(())
    }
}
