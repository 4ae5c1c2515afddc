//! Bindings to the native ray-tracing runtime library.

use std::ffi::{c_char, c_int, c_uint, c_void, CStr, CString};
use std::ptr;

use super::{Driver, NativeCode};

type RtResult = c_int;

#[link(name = "optix")]
unsafe extern "C" {
    fn rtContextCreate(context: *mut *mut c_void) -> RtResult;
    fn rtContextDestroy(context: *mut c_void) -> RtResult;
    fn rtContextSetRayTypeCount(context: *mut c_void, count: c_uint) -> RtResult;
    fn rtContextSetEntryPointCount(context: *mut c_void, count: c_uint) -> RtResult;
    fn rtContextSetStackSize(context: *mut c_void, bytes: usize) -> RtResult;
    fn rtContextDeclareVariable(
        context: *mut c_void,
        name: *const c_char,
        variable: *mut *mut c_void,
    ) -> RtResult;
    fn rtContextSetRayGenerationProgram(
        context: *mut c_void,
        entry_point: c_uint,
        program: *mut c_void,
    ) -> RtResult;
    fn rtContextSetExceptionProgram(
        context: *mut c_void,
        entry_point: c_uint,
        program: *mut c_void,
    ) -> RtResult;
    fn rtContextGetErrorString(context: *mut c_void, code: RtResult, message: *mut *const c_char);
    fn rtProgramCreateFromPTXString(
        context: *mut c_void,
        ptx: *const c_char,
        program_name: *const c_char,
        program: *mut *mut c_void,
    ) -> RtResult;
    fn rtMaterialCreate(context: *mut c_void, material: *mut *mut c_void) -> RtResult;
    fn rtMaterialDestroy(material: *mut c_void) -> RtResult;
    fn rtMaterialSetClosestHitProgram(
        material: *mut c_void,
        ray_type: c_uint,
        program: *mut c_void,
    ) -> RtResult;
    fn rtMaterialSetAnyHitProgram(
        material: *mut c_void,
        ray_type: c_uint,
        program: *mut c_void,
    ) -> RtResult;
    fn rtVariableSetUserData(variable: *mut c_void, size: usize, ptr: *const c_void) -> RtResult;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RtContext(*mut c_void);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RtProgram(*mut c_void);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RtMaterial(*mut c_void);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RtVariable(*mut c_void);

/// Forwards every call to the linked runtime.
#[derive(Default)]
pub struct OptixDriver;

impl OptixDriver {
    pub fn new() -> Self {
        Self
    }
}

fn c_string(text: &[u8]) -> Result<CString, NativeCode> {
    let text = text.strip_suffix(&[0]).unwrap_or(text);
    CString::new(text).map_err(|_| NativeCode::INVALID_VALUE)
}

impl Driver for OptixDriver {
    type Context = RtContext;
    type Program = RtProgram;
    type Material = RtMaterial;
    type Variable = RtVariable;

    fn context_create(&self) -> Result<RtContext, NativeCode> {
        let mut raw = ptr::null_mut();
        NativeCode::result(unsafe { rtContextCreate(&mut raw) })?;
        Ok(RtContext(raw))
    }

    fn context_destroy(&self, ctx: RtContext) -> Result<(), NativeCode> {
        NativeCode::result(unsafe { rtContextDestroy(ctx.0) })
    }

    fn context_set_ray_type_count(&self, ctx: RtContext, count: u32) -> Result<(), NativeCode> {
        NativeCode::result(unsafe { rtContextSetRayTypeCount(ctx.0, count) })
    }

    fn context_set_entry_point_count(&self, ctx: RtContext, count: u32) -> Result<(), NativeCode> {
        NativeCode::result(unsafe { rtContextSetEntryPointCount(ctx.0, count) })
    }

    fn context_set_stack_size(&self, ctx: RtContext, bytes: usize) -> Result<(), NativeCode> {
        NativeCode::result(unsafe { rtContextSetStackSize(ctx.0, bytes) })
    }

    fn context_declare_variable(
        &self,
        ctx: RtContext,
        name: &str,
    ) -> Result<RtVariable, NativeCode> {
        let name = c_string(name.as_bytes())?;
        let mut raw = ptr::null_mut();
        NativeCode::result(unsafe { rtContextDeclareVariable(ctx.0, name.as_ptr(), &mut raw) })?;
        Ok(RtVariable(raw))
    }

    fn context_set_ray_generation_program(
        &self,
        ctx: RtContext,
        entry_point: u32,
        program: RtProgram,
    ) -> Result<(), NativeCode> {
        let code = unsafe { rtContextSetRayGenerationProgram(ctx.0, entry_point, program.0) };
        NativeCode::result(code)
    }

    fn context_set_exception_program(
        &self,
        ctx: RtContext,
        entry_point: u32,
        program: RtProgram,
    ) -> Result<(), NativeCode> {
        let code = unsafe { rtContextSetExceptionProgram(ctx.0, entry_point, program.0) };
        NativeCode::result(code)
    }

    fn context_error_string(&self, ctx: RtContext, code: NativeCode) -> Option<String> {
        let mut message: *const c_char = ptr::null();
        unsafe { rtContextGetErrorString(ctx.0, code.0, &mut message) };
        if message.is_null() {
            return None;
        }
        // The runtime keeps ownership of the string.
        Some(unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned())
    }

    fn program_create_from_ir(
        &self,
        ctx: RtContext,
        ir: &[u8],
        entry_name: &str,
    ) -> Result<RtProgram, NativeCode> {
        let ptx = c_string(ir)?;
        let name = c_string(entry_name.as_bytes())?;
        let mut raw = ptr::null_mut();
        let code =
            unsafe { rtProgramCreateFromPTXString(ctx.0, ptx.as_ptr(), name.as_ptr(), &mut raw) };
        NativeCode::result(code)?;
        Ok(RtProgram(raw))
    }

    fn material_create(&self, ctx: RtContext) -> Result<RtMaterial, NativeCode> {
        let mut raw = ptr::null_mut();
        NativeCode::result(unsafe { rtMaterialCreate(ctx.0, &mut raw) })?;
        Ok(RtMaterial(raw))
    }

    fn material_destroy(&self, material: RtMaterial) -> Result<(), NativeCode> {
        NativeCode::result(unsafe { rtMaterialDestroy(material.0) })
    }

    fn material_set_closest_hit_program(
        &self,
        material: RtMaterial,
        ray_type: u32,
        program: RtProgram,
    ) -> Result<(), NativeCode> {
        let code = unsafe { rtMaterialSetClosestHitProgram(material.0, ray_type, program.0) };
        NativeCode::result(code)
    }

    fn material_set_any_hit_program(
        &self,
        material: RtMaterial,
        ray_type: u32,
        program: RtProgram,
    ) -> Result<(), NativeCode> {
        let code = unsafe { rtMaterialSetAnyHitProgram(material.0, ray_type, program.0) };
        NativeCode::result(code)
    }

    fn variable_set_user_data(&self, variable: RtVariable, bytes: &[u8]) -> Result<(), NativeCode> {
        let code = unsafe { rtVariableSetUserData(variable.0, bytes.len(), bytes.as_ptr().cast()) };
        NativeCode::result(code)
    }
}
