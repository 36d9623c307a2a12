//! GPU engines of the Tegra GPU model.
//!
//! Every engine is a register file driven by method calls: the puller ([`Gpu`]) decodes the
//! command stream into [`MethodCall`]s, stores each argument in the register file of the engine
//! bound to the call's subchannel, and the engine reacts to the handful of registers that trigger
//! work.
//!
//! - [`KeplerMemory`] is the inline-to-memory engine: it copies words embedded in the command
//!   stream into GPU virtual memory, invalidating the rasterizer's cached surfaces first.
//! - [`KeplerCompute`] only records state; compute launches are rejected.
//!
//! Engines never own guest memory, the page table or the rasterizer cache. Those are lent to them
//! for the duration of a call through an [`EngineContext`].
#![forbid(unsafe_code)]

pub mod config;
pub mod dirty;
pub mod error;
pub mod gpu;
pub mod kepler_compute;
pub mod kepler_memory;
pub mod method;
pub mod rasterizer;
pub mod regs;

pub use config::{ConfigError, GpuConfig};
pub use dirty::{DirtyFlags, DirtyTracker, NUM_VERTEX_ARRAYS};
pub use error::{EngineError, TransferModeFault};
pub use gpu::{EngineClass, Gpu, GpuError, NUM_PULLER_METHODS, NUM_SUBCHANNELS};
pub use kepler_compute::KeplerCompute;
pub use kepler_memory::{DestRegs, EngineContext, ExecFlags, KeplerMemory};
pub use method::MethodCall;
pub use rasterizer::{CacheStats, CachedSurface, NullRasterizer, RasterizerCache, SurfaceCache};
pub use regs::{RegisterError, RegisterFile};
pub use tegra_memory::{AddressTranslator, MemoryBus};
