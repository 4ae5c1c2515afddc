use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Flags handed to the just-in-time device compiler.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompilerOptions {
    pub arch: String,
    pub max_register_count: u32,
    pub fast_math: bool,
    pub extra_flags: Vec<String>,
    /// Name the compiler gives the translation unit in its diagnostics.
    pub program_name: String,
    /// Where to write a copy of the produced IR, if anywhere.
    pub ir_dump_path: Option<PathBuf>,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            arch: "compute_20".to_string(),
            max_register_count: 64,
            fast_math: true,
            extra_flags: Vec::new(),
            program_name: "compiled_kernel".to_string(),
            ir_dump_path: None,
        }
    }
}

impl CompilerOptions {
    pub fn flags(&self) -> Vec<String> {
        let mut flags = vec![
            format!("--gpu-architecture={}", self.arch),
            format!("--maxrregcount={}", self.max_register_count),
        ];
        if self.fast_math {
            flags.push("--use_fast_math".to_string());
        }
        flags.extend(self.extra_flags.iter().cloned());
        flags
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContextSettings {
    pub ray_type_count: u32,
    pub stack_size: usize,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self { ray_type_count: 1, stack_size: 14000 }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    /// One of `trace`, `debug`, `info`, `warn`, `error`.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub kernel_path: PathBuf,
    pub compiler: CompilerOptions,
    pub context: ContextSettings,
    pub logging: LogConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            kernel_path: PathBuf::from("kernel.cu"),
            compiler: CompilerOptions::default(),
            context: ContextSettings::default(),
            logging: LogConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_json(&text).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }
}
