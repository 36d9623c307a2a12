//! Method puller and the shared state its engines operate on.
//!
//! Methods below [`NUM_PULLER_METHODS`] are handled by the puller itself; `BindObject` (method 0)
//! selects which engine class a subchannel talks to. Every other method is forwarded to the engine
//! bound on the call's subchannel.

use thiserror::Error;

use tegra_memory::{
    DenseMemory, GpuMemoryManager, GuestBus, GuestMemory, GuestMemoryError, MapError, MemoryBus,
    SparseMemory,
};

use crate::config::{ConfigError, GpuConfig};
use crate::dirty::DirtyFlags;
use crate::error::EngineError;
use crate::kepler_compute::KeplerCompute;
use crate::kepler_memory::{EngineContext, KeplerMemory};
use crate::method::MethodCall;
use crate::rasterizer::{RasterizerCache, SurfaceCache};

pub const NUM_SUBCHANNELS: usize = 8;

/// Methods below this index belong to the puller, not to the bound engine.
pub const NUM_PULLER_METHODS: u32 = 0x40;

const METHOD_BIND_OBJECT: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum EngineClass {
    KeplerInlineToMemory = 0xA140,
    KeplerCompute = 0xB1C0,
}

impl EngineClass {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0xA140 => Some(Self::KeplerInlineToMemory),
            0xB1C0 => Some(Self::KeplerCompute),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum GpuError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Memory(#[from] GuestMemoryError),
    #[error(transparent)]
    Map(#[from] MapError),
    #[error("subchannel {0} out of range")]
    InvalidSubchannel(u32),
    #[error("engine class 0x{class:x} (subchannel {subchannel}) is not supported")]
    UnsupportedEngineClass { subchannel: u32, class: u32 },
    #[error("method 0x{method:x} sent to unbound subchannel {subchannel}")]
    UnboundSubchannel { subchannel: u32, method: u32 },
    #[error("{class:?} engine fault: {source}")]
    Engine {
        class: EngineClass,
        #[source]
        source: EngineError,
    },
}

/// GPU front end: puller, engines, and the resources they share.
///
/// Everything runs synchronously on the caller's thread, in method order.
pub struct Gpu<R = SurfaceCache> {
    memory_manager: GpuMemoryManager,
    memory: GuestBus<Box<dyn GuestMemory>>,
    rasterizer: R,
    dirty: DirtyFlags,
    kepler_memory: KeplerMemory,
    kepler_compute: KeplerCompute,
    bound_engines: [Option<EngineClass>; NUM_SUBCHANNELS],
}

impl Gpu<SurfaceCache> {
    pub fn new(config: GpuConfig) -> Result<Self, GpuError> {
        Self::with_rasterizer(config, SurfaceCache::new())
    }
}

impl<R: RasterizerCache> Gpu<R> {
    pub fn with_rasterizer(config: GpuConfig, rasterizer: R) -> Result<Self, GpuError> {
        config.validate()?;

        let ram: Box<dyn GuestMemory> = if config.sparse_memory {
            Box::new(SparseMemory::new(config.physical_memory_bytes)?)
        } else {
            Box::new(DenseMemory::new(config.physical_memory_bytes)?)
        };

        Ok(Self {
            memory_manager: GpuMemoryManager::with_page_bits(config.page_bits)?,
            memory: GuestBus::new(ram),
            rasterizer,
            dirty: DirtyFlags::default(),
            kepler_memory: KeplerMemory::new(),
            kepler_compute: KeplerCompute::new(),
            bound_engines: [None; NUM_SUBCHANNELS],
        })
    }

    pub fn call_method(&mut self, call: MethodCall) -> Result<(), GpuError> {
        let subchannel = usize::try_from(call.subchannel)
            .ok()
            .filter(|&s| s < NUM_SUBCHANNELS)
            .ok_or(GpuError::InvalidSubchannel(call.subchannel))?;

        if call.method == METHOD_BIND_OBJECT {
            return self.bind_object(subchannel, call.argument);
        }
        if call.method < NUM_PULLER_METHODS {
            tracing::trace!(
                method = call.method,
                argument = call.argument,
                "ignoring puller method"
            );
            return Ok(());
        }

        let class = self.bound_engines[subchannel].ok_or(GpuError::UnboundSubchannel {
            subchannel: call.subchannel,
            method: call.method,
        })?;

        let result = match class {
            EngineClass::KeplerInlineToMemory => {
                let mut ctx = EngineContext {
                    memory_manager: &self.memory_manager,
                    rasterizer: &mut self.rasterizer,
                    memory: &mut self.memory,
                    dirty: &mut self.dirty,
                };
                self.kepler_memory.call_method(&call, &mut ctx)
            }
            EngineClass::KeplerCompute => self.kepler_compute.call_method(&call),
        };
        result.map_err(|source| GpuError::Engine { class, source })
    }

    /// Sends every argument to the same method, as a non-incrementing command header does.
    ///
    /// Stops at the first failing call; earlier calls stay applied.
    pub fn call_multi_method(
        &mut self,
        method: u32,
        subchannel: u32,
        arguments: &[u32],
    ) -> Result<(), GpuError> {
        let total = arguments.len();
        for (i, &argument) in arguments.iter().enumerate() {
            let method_count = u32::try_from(total - i).unwrap_or(u32::MAX);
            self.call_method(MethodCall::new(method, argument, subchannel, method_count))?;
        }
        Ok(())
    }

    fn bind_object(&mut self, subchannel: usize, raw_class: u32) -> Result<(), GpuError> {
        let class = EngineClass::from_raw(raw_class).ok_or(GpuError::UnsupportedEngineClass {
            subchannel: subchannel as u32,
            class: raw_class,
        })?;
        tracing::debug!(subchannel, ?class, "bound engine");
        self.bound_engines[subchannel] = Some(class);
        Ok(())
    }

    pub fn bound_engine(&self, subchannel: usize) -> Option<EngineClass> {
        self.bound_engines.get(subchannel).copied().flatten()
    }

    pub fn flush_region(&mut self, addr: u64, size: u64) {
        self.rasterizer.flush_region(addr, size);
    }

    pub fn invalidate_region(&mut self, addr: u64, size: u64) {
        self.rasterizer.invalidate_region(addr, size);
    }

    pub fn flush_and_invalidate_region(&mut self, addr: u64, size: u64) {
        self.rasterizer.flush_and_invalidate_region(addr, size);
    }

    pub fn memory_manager(&self) -> &GpuMemoryManager {
        &self.memory_manager
    }

    pub fn memory_manager_mut(&mut self) -> &mut GpuMemoryManager {
        &mut self.memory_manager
    }

    pub fn memory(&self) -> &dyn GuestMemory {
        &**self.memory.ram()
    }

    pub fn memory_bus_mut(&mut self) -> &mut dyn MemoryBus {
        &mut self.memory
    }

    pub fn rasterizer(&self) -> &R {
        &self.rasterizer
    }

    pub fn rasterizer_mut(&mut self) -> &mut R {
        &mut self.rasterizer
    }

    pub fn dirty_flags(&self) -> &DirtyFlags {
        &self.dirty
    }

    pub fn dirty_flags_mut(&mut self) -> &mut DirtyFlags {
        &mut self.dirty
    }

    pub fn kepler_memory(&self) -> &KeplerMemory {
        &self.kepler_memory
    }

    pub fn kepler_compute(&self) -> &KeplerCompute {
        &self.kepler_compute
    }
}
