//! Bootstraps a GPU ray-tracing pipeline: kernel source is compiled to device
//! IR at runtime, then a device context is created and configured with
//! entry-point programs, declared variables and per-material hit programs.
//!
//! Every fallible operation returns [`Result`]. Whether an [`Error`] ends the
//! process is the caller's decision; the library never aborts.

pub mod compiler;
pub mod config;
pub mod context;
pub mod cuda;
pub mod driver;
pub mod error;
pub mod logging;
pub mod material;
pub mod variable;

pub use compiler::{
    CompileOutcome, CompiledProgram, Diagnostics, JitBackend, JitFailure, KernelCompiler,
    LoadedSource,
};
pub use config::{CompilerOptions, ContextSettings, LogConfig, PipelineConfig};
pub use context::DeviceContext;
pub use driver::{Driver, NativeCode};
pub use error::{Error, Result};
pub use material::{HitPrograms, Material};
pub use variable::Variable;
