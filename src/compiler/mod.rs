//! Kernel source to device IR.
//!
//! A compile runs in two consumed steps: [`KernelCompiler::load_source`]
//! produces a [`LoadedSource`], and [`KernelCompiler::compile_loaded`] turns
//! it into a [`CompileOutcome`]. A source the device compiler rejects is an
//! ordinary outcome carrying the compiler log; everything else that goes wrong
//! is an [`Error`].

use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::CompilerOptions;
use crate::error::{Error, Result};
use crate::logging;

/// Why the device compiler produced no IR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JitFailure {
    /// The source was compiled and rejected; `log` is the compiler's output.
    Rejected { log: String },
    /// The compiler itself could not run or answer a query.
    Native(String),
}

/// A just-in-time device compiler.
pub trait JitBackend {
    fn compile(
        &self,
        source: &str,
        program_name: &str,
        flags: &[String],
    ) -> std::result::Result<Vec<u8>, JitFailure>;
}

/// Device IR produced from one source unit.
#[derive(Clone, PartialEq, Eq)]
pub struct CompiledProgram {
    ir: Vec<u8>,
}

impl CompiledProgram {
    /// Wraps IR bytes, dropping the terminator(s) the compiler appends.
    pub fn from_ir(mut ir: Vec<u8>) -> Self {
        while ir.last() == Some(&0) {
            ir.pop();
        }
        Self { ir }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.ir
    }

    pub fn as_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.ir)
    }

    pub fn len(&self) -> usize {
        self.ir.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ir.is_empty()
    }
}

impl std::fmt::Debug for CompiledProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledProgram").field("len", &self.ir.len()).finish()
    }
}

/// Compiler output for a rejected source. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostics {
    log: String,
}

impl Diagnostics {
    fn new(log: String) -> Self {
        let log = log.trim_end_matches('\0').trim_end().to_string();
        if log.is_empty() {
            Self { log: "compilation failed without a log".to_string() }
        } else {
            Self { log }
        }
    }

    pub fn log(&self) -> &str {
        &self.log
    }
}

#[derive(Debug)]
pub enum CompileOutcome {
    Compiled(CompiledProgram),
    Rejected(Diagnostics),
}

impl CompileOutcome {
    pub fn program(self) -> Option<CompiledProgram> {
        match self {
            CompileOutcome::Compiled(program) => Some(program),
            CompileOutcome::Rejected(_) => None,
        }
    }

    pub fn diagnostics(&self) -> Option<&Diagnostics> {
        match self {
            CompileOutcome::Compiled(_) => None,
            CompileOutcome::Rejected(diagnostics) => Some(diagnostics),
        }
    }
}

/// Kernel source text ready to be compiled once.
#[derive(Debug)]
pub struct LoadedSource {
    origin: PathBuf,
    text: String,
}

impl LoadedSource {
    /// Source that did not come from a file, such as an embedded kernel.
    pub fn inline(text: impl Into<String>) -> Self {
        Self { origin: PathBuf::from("<inline>"), text: text.into() }
    }

    pub fn origin(&self) -> &Path {
        &self.origin
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

pub struct KernelCompiler<B> {
    options: CompilerOptions,
    backend: B,
}

impl<B: JitBackend> KernelCompiler<B> {
    pub fn new(options: CompilerOptions, backend: B) -> Self {
        Self { options, backend }
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    /// Reads the whole kernel source. A missing or unreadable file is fatal.
    pub fn load_source(&self, path: &Path) -> Result<LoadedSource> {
        tracing::info!("Trying to load kernel from source located at {}", path.display());
        match fs::read_to_string(path) {
            Ok(text) => Ok(LoadedSource { origin: path.to_path_buf(), text }),
            Err(source) => {
                let err = Error::SourceUnreadable { path: path.to_path_buf(), source };
                tracing::error!("{err}");
                Err(err)
            }
        }
    }

    pub fn compile(&self, path: &Path) -> Result<CompileOutcome> {
        let source = self.load_source(path)?;
        self.compile_loaded(source)
    }

    pub fn compile_loaded(&self, source: LoadedSource) -> Result<CompileOutcome> {
        let flags = self.options.flags();
        tracing::debug!("compiling {} with {:?}", source.origin.display(), flags);

        let ir = match self.backend.compile(&source.text, &self.options.program_name, &flags) {
            Ok(ir) => ir,
            Err(JitFailure::Rejected { log }) => {
                let diagnostics = Diagnostics::new(log);
                tracing::error!(
                    "kernel {} failed to compile:\n{}",
                    source.origin.display(),
                    diagnostics.log()
                );
                return Ok(CompileOutcome::Rejected(diagnostics));
            }
            Err(JitFailure::Native(msg)) => {
                tracing::error!("kernel compiler failed: {msg}");
                return Err(Error::Jit(msg));
            }
        };

        let program = CompiledProgram::from_ir(ir);
        if program.is_empty() {
            tracing::error!("kernel compiler produced no IR for {}", source.origin.display());
            return Err(Error::Jit("compiler produced empty IR".to_string()));
        }
        tracing::info!("compiled {} into {} bytes of IR", source.origin.display(), program.len());
        logging::raw(&program.as_text());

        if let Some(path) = &self.options.ir_dump_path {
            dump_ir(path, &program);
        }
        Ok(CompileOutcome::Compiled(program))
    }
}

/// Best-effort copy of the IR for inspection.
fn dump_ir(path: &Path, program: &CompiledProgram) {
    match fs::write(path, program.as_bytes()) {
        Ok(()) => tracing::info!("wrote IR to {}", path.display()),
        Err(e) => tracing::warn!("could not write IR to {}: {e}", path.display()),
    }
}
