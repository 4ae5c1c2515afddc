//! The native ray-tracing layer, one trait method per native call.
//!
//! [`host::HostDriver`] emulates the runtime in process. With the `optix`
//! feature, [`optix::OptixDriver`] forwards to the real runtime library.

use std::fmt;

pub mod host;
#[cfg(feature = "optix")]
pub mod optix;

/// Raw result code of a failed native call. Zero is success and never
/// appears inside an `Err`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NativeCode(pub i32);

impl NativeCode {
    pub const CONTEXT_CREATION_FAILED: NativeCode = NativeCode(0x500);
    pub const INVALID_CONTEXT: NativeCode = NativeCode(0x501);
    pub const INVALID_VALUE: NativeCode = NativeCode(0x502);
    pub const MEMORY_ALLOCATION_FAILED: NativeCode = NativeCode(0x503);
    pub const TYPE_MISMATCH: NativeCode = NativeCode(0x504);
    pub const VARIABLE_NOT_FOUND: NativeCode = NativeCode(0x505);
    pub const VARIABLE_REDECLARED: NativeCode = NativeCode(0x506);
    pub const ILLEGAL_SYMBOL: NativeCode = NativeCode(0x507);
    pub const INVALID_SOURCE: NativeCode = NativeCode(0x508);
    pub const VERSION_MISMATCH: NativeCode = NativeCode(0x509);
    pub const OBJECT_CREATION_FAILED: NativeCode = NativeCode(0x600);
    pub const NO_DEVICE: NativeCode = NativeCode(0x601);
    pub const INVALID_DEVICE: NativeCode = NativeCode(0x602);
    pub const LAUNCH_FAILED: NativeCode = NativeCode(0x900);
    pub const UNKNOWN: NativeCode = NativeCode(-1);

    /// Converts a raw native return value, where zero means success.
    pub fn result(raw: i32) -> Result<(), NativeCode> {
        if raw == 0 { Ok(()) } else { Err(NativeCode(raw)) }
    }
}

impl fmt::Display for NativeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Name of a known native code, used when no context is available to ask.
pub fn describe_code(code: NativeCode) -> Option<&'static str> {
    let name = match code {
        NativeCode::CONTEXT_CREATION_FAILED => "Context creation failed",
        NativeCode::INVALID_CONTEXT => "Invalid context",
        NativeCode::INVALID_VALUE => "Invalid value",
        NativeCode::MEMORY_ALLOCATION_FAILED => "Memory allocation failed",
        NativeCode::TYPE_MISMATCH => "Type mismatch",
        NativeCode::VARIABLE_NOT_FOUND => "Variable not found",
        NativeCode::VARIABLE_REDECLARED => "Variable redeclared",
        NativeCode::ILLEGAL_SYMBOL => "Illegal symbol",
        NativeCode::INVALID_SOURCE => "Invalid source",
        NativeCode::VERSION_MISMATCH => "Version mismatch",
        NativeCode::OBJECT_CREATION_FAILED => "Object creation failed",
        NativeCode::NO_DEVICE => "No device",
        NativeCode::INVALID_DEVICE => "Invalid device",
        NativeCode::LAUNCH_FAILED => "Launch failed",
        _ => return None,
    };
    Some(name)
}

/// Native ray-tracing API.
///
/// Objects are owned by the context they were created in; destroying the
/// context releases its programs and variables. Implementations use interior
/// mutability and are driven from a single thread.
pub trait Driver {
    type Context: Copy + Eq + fmt::Debug;
    type Program: Copy + Eq + fmt::Debug;
    type Material: Copy + Eq + fmt::Debug;
    type Variable: Copy + Eq + fmt::Debug;

    fn context_create(&self) -> Result<Self::Context, NativeCode>;
    fn context_destroy(&self, ctx: Self::Context) -> Result<(), NativeCode>;
    fn context_set_ray_type_count(&self, ctx: Self::Context, count: u32) -> Result<(), NativeCode>;
    fn context_set_entry_point_count(&self, ctx: Self::Context, count: u32)
    -> Result<(), NativeCode>;
    fn context_set_stack_size(&self, ctx: Self::Context, bytes: usize) -> Result<(), NativeCode>;
    fn context_declare_variable(
        &self,
        ctx: Self::Context,
        name: &str,
    ) -> Result<Self::Variable, NativeCode>;
    fn context_set_ray_generation_program(
        &self,
        ctx: Self::Context,
        entry_point: u32,
        program: Self::Program,
    ) -> Result<(), NativeCode>;
    fn context_set_exception_program(
        &self,
        ctx: Self::Context,
        entry_point: u32,
        program: Self::Program,
    ) -> Result<(), NativeCode>;

    /// Looks up the context-specific message for `code`.
    fn context_error_string(&self, ctx: Self::Context, code: NativeCode) -> Option<String>;

    fn program_create_from_ir(
        &self,
        ctx: Self::Context,
        ir: &[u8],
        entry_name: &str,
    ) -> Result<Self::Program, NativeCode>;

    fn material_create(&self, ctx: Self::Context) -> Result<Self::Material, NativeCode>;
    fn material_destroy(&self, material: Self::Material) -> Result<(), NativeCode>;
    fn material_set_closest_hit_program(
        &self,
        material: Self::Material,
        ray_type: u32,
        program: Self::Program,
    ) -> Result<(), NativeCode>;
    fn material_set_any_hit_program(
        &self,
        material: Self::Material,
        ray_type: u32,
        program: Self::Program,
    ) -> Result<(), NativeCode>;

    fn variable_set_user_data(&self, variable: Self::Variable, bytes: &[u8])
    -> Result<(), NativeCode>;
}
