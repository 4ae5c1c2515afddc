//! NVRTC backend for the kernel compiler.

use crate::compiler::{JitBackend, JitFailure};
#[cfg(feature = "nvrtc")]
use crate::error::Error;
use crate::error::Result;

#[cfg(feature = "nvrtc")]
mod imp {
    use crate::compiler::JitFailure;
    use cudarc::nvrtc::{compile_ptx_with_opts, CompileError, CompileOptions};

    pub fn compile(source: &str, flags: &[String]) -> Result<Vec<u8>, JitFailure> {
        let opts = CompileOptions { options: flags.to_vec(), ..Default::default() };
        match compile_ptx_with_opts(source, opts) {
            Ok(ptx) => Ok(ptx.to_src().into_bytes()),
            Err(CompileError::CompileError { log, .. }) => Err(JitFailure::Rejected {
                log: log.to_string_lossy().into_owned(),
            }),
            Err(e) => Err(JitFailure::Native(format!("nvrtc failed: {e:?}"))),
        }
    }

    pub fn init_driver() -> Result<(), String> {
        cudarc::driver::result::init().map_err(|e| format!("cuInit failed: {e:?}"))
    }
}

/// Initializes the CUDA driver ahead of the ray-tracing runtime.
#[cfg(feature = "nvrtc")]
pub fn init_driver() -> Result<()> {
    imp::init_driver().map_err(|msg| {
        tracing::error!("{msg}");
        Error::Device(msg)
    })
}

/// Without CUDA there is no driver to initialize.
#[cfg(not(feature = "nvrtc"))]
pub fn init_driver() -> Result<()> {
    tracing::debug!("CUDA backend not enabled, skipping driver init");
    Ok(())
}

/// Runtime compilation through NVRTC.
///
/// NVRTC names the translation unit itself, so `program_name` only shows up
/// in this crate's own log lines.
#[derive(Clone, Copy, Debug, Default)]
pub struct Nvrtc;

#[cfg(feature = "nvrtc")]
impl JitBackend for Nvrtc {
    fn compile(
        &self,
        source: &str,
        program_name: &str,
        flags: &[String],
    ) -> std::result::Result<Vec<u8>, JitFailure> {
        tracing::debug!("nvrtc: compiling {program_name}");
        imp::compile(source, flags)
    }
}

#[cfg(not(feature = "nvrtc"))]
impl JitBackend for Nvrtc {
    fn compile(
        &self,
        _source: &str,
        _program_name: &str,
        _flags: &[String],
    ) -> std::result::Result<Vec<u8>, JitFailure> {
        Err(JitFailure::Native(
            concat!(
                "CUDA backend not enabled. ",
                "Rebuild with --features cuda (or cuda-12000, cuda-11080, etc)."
            )
            .to_string(),
        ))
    }
}
