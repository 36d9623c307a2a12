use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("method 0x{index:x} is outside the {num_regs}-entry register file")]
    OutOfRange { index: u32, num_regs: usize },
}

/// Fixed-size file of 32-bit registers addressed by method index.
///
/// Every write is stored, whether or not the index has a defined meaning, so that all registers
/// read back what was last written (MMIO semantics).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterFile<const N: usize> {
    regs: Box<[u32]>,
}

impl<const N: usize> Default for RegisterFile<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RegisterFile<N> {
    pub const NUM_REGS: usize = N;

    pub fn new() -> Self {
        Self {
            regs: vec![0u32; N].into_boxed_slice(),
        }
    }

    fn slot(index: u32) -> Result<usize, RegisterError> {
        usize::try_from(index)
            .ok()
            .filter(|&i| i < N)
            .ok_or(RegisterError::OutOfRange { index, num_regs: N })
    }

    pub fn write(&mut self, index: u32, value: u32) -> Result<(), RegisterError> {
        let slot = Self::slot(index)?;
        self.regs[slot] = value;
        Ok(())
    }

    pub fn read(&self, index: u32) -> Result<u32, RegisterError> {
        let slot = Self::slot(index)?;
        Ok(self.regs[slot])
    }

    /// Infallible read for register indices known at compile time to be in range.
    #[inline]
    pub(crate) fn get(&self, index: u32) -> u32 {
        self.regs[index as usize]
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.regs
    }
}
