//! Device execution context.
//!
//! `init` and `destroy` take `&mut self`; everything else takes `&self`.
//! Materials and variables borrow the context, so a context cannot be
//! destroyed or re-initialized while either is still around.

use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::Location;

use crate::compiler::CompiledProgram;
use crate::config::ContextSettings;
use crate::driver::{Driver, NativeCode};
use crate::error::{self, Error, Result};
use crate::variable::Variable;

/// The only entry point the pipeline installs programs on.
pub const ENTRY_POINT: u32 = 0;

struct ContextState<D: Driver> {
    ray_type_count: Option<u32>,
    entry_point_count: Option<u32>,
    stack_size: Option<usize>,
    variables: HashMap<String, D::Variable>,
    programs: Vec<D::Program>,
    ray_generation: Option<D::Program>,
    exception: Option<D::Program>,
}

impl<D: Driver> Default for ContextState<D> {
    fn default() -> Self {
        Self {
            ray_type_count: None,
            entry_point_count: None,
            stack_size: None,
            variables: HashMap::new(),
            programs: Vec::new(),
            ray_generation: None,
            exception: None,
        }
    }
}

pub struct DeviceContext<D: Driver> {
    driver: D,
    handle: Option<D::Context>,
    state: RefCell<ContextState<D>>,
}

impl<D: Driver> DeviceContext<D> {
    /// An uninitialized context; call [`DeviceContext::init`] before use.
    pub fn new(driver: D) -> Self {
        Self { driver, handle: None, state: RefCell::new(ContextState::default()) }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn handle(&self) -> Option<D::Context> {
        self.handle
    }

    pub fn is_live(&self) -> bool {
        self.handle.is_some()
    }

    #[track_caller]
    pub fn init(&mut self) -> Result<()> {
        let at = Location::caller();
        if self.handle.is_some() {
            return Err(Error::precondition_at("context initialized twice", at));
        }
        // No context exists yet to describe a failure.
        let handle = error::check("rtContextCreate", self.driver.context_create(), at, |_| None)?;
        self.handle = Some(handle);
        tracing::debug!("context {handle:?} created");
        Ok(())
    }

    /// Destroys the native context along with every program and variable it owns.
    #[track_caller]
    pub fn destroy(&mut self) -> Result<()> {
        let at = Location::caller();
        let ctx = self.live(at)?;
        self.check("rtContextDestroy", self.driver.context_destroy(ctx), at)?;
        self.handle = None;
        *self.state.get_mut() = ContextState::default();
        tracing::debug!("context {ctx:?} destroyed");
        Ok(())
    }

    #[track_caller]
    pub fn set_ray_type_count(&self, count: u32) -> Result<()> {
        let at = Location::caller();
        let ctx = self.live(at)?;
        if count == 0 {
            return Err(Error::precondition_at("ray type count must be > 0", at));
        }
        let result = self.driver.context_set_ray_type_count(ctx, count);
        self.check("rtContextSetRayTypeCount", result, at)?;
        self.state.borrow_mut().ray_type_count = Some(count);
        Ok(())
    }

    #[track_caller]
    pub fn set_entry_point_count(&self, count: u32) -> Result<()> {
        let at = Location::caller();
        self.entry_point_count_at(count, at)
    }

    fn entry_point_count_at(&self, count: u32, at: &'static Location<'static>) -> Result<()> {
        let ctx = self.live(at)?;
        if count == 0 {
            return Err(Error::precondition_at("entry point count must be > 0", at));
        }
        let result = self.driver.context_set_entry_point_count(ctx, count);
        self.check("rtContextSetEntryPointCount", result, at)?;
        self.state.borrow_mut().entry_point_count = Some(count);
        Ok(())
    }

    #[track_caller]
    pub fn set_stack_size(&self, bytes: usize) -> Result<()> {
        let at = Location::caller();
        let ctx = self.live(at)?;
        if bytes == 0 {
            return Err(Error::precondition_at("stack size must be > 0", at));
        }
        self.check("rtContextSetStackSize", self.driver.context_set_stack_size(ctx, bytes), at)?;
        self.state.borrow_mut().stack_size = Some(bytes);
        Ok(())
    }

    /// Applies the ray-type count and stack size from `settings`.
    #[track_caller]
    pub fn configure(&self, settings: &ContextSettings) -> Result<()> {
        self.set_ray_type_count(settings.ray_type_count)?;
        self.set_stack_size(settings.stack_size)
    }

    /// Declares a device-visible variable. Names are unique per context.
    #[track_caller]
    pub fn declare_variable(&self, name: &str) -> Result<Variable<'_, D>> {
        let at = Location::caller();
        let ctx = self.live(at)?;
        if name.is_empty() || name.contains('\0') {
            return Err(Error::precondition_at(format!("invalid variable name {name:?}"), at));
        }
        if self.state.borrow().variables.contains_key(name) {
            return Err(Error::precondition_at(format!("variable '{name}' declared twice"), at));
        }
        let result = self.driver.context_declare_variable(ctx, name);
        let handle = self.check("rtContextDeclareVariable", result, at)?;
        self.state.borrow_mut().variables.insert(name.to_string(), handle);
        Ok(Variable::new(self, name, handle))
    }

    /// Installs `entry_name` as the ray-generation program of entry point 0.
    ///
    /// The entry-point count is reset to exactly 1 first: the pipeline only
    /// ever drives a single entry point, so an earlier larger count is lost.
    #[track_caller]
    pub fn set_ray_generation_program(&self, ir: &CompiledProgram, entry_name: &str) -> Result<()> {
        let at = Location::caller();
        let ctx = self.live(at)?;
        self.entry_point_count_at(1, at)?;
        let program = self.create_program_at(ir, entry_name, at)?;
        self.check(
            "rtContextSetRayGenerationProgram",
            self.driver.context_set_ray_generation_program(ctx, ENTRY_POINT, program),
            at,
        )?;
        self.state.borrow_mut().ray_generation = Some(program);
        Ok(())
    }

    #[track_caller]
    pub fn set_exception_program(&self, ir: &CompiledProgram, entry_name: &str) -> Result<()> {
        let at = Location::caller();
        let ctx = self.live(at)?;
        let program = self.create_program_at(ir, entry_name, at)?;
        self.check(
            "rtContextSetExceptionProgram",
            self.driver.context_set_exception_program(ctx, ENTRY_POINT, program),
            at,
        )?;
        self.state.borrow_mut().exception = Some(program);
        Ok(())
    }

    /// Instantiates the program `entry_name` from `ir`. The context owns it.
    #[track_caller]
    pub fn create_program(&self, ir: &CompiledProgram, entry_name: &str) -> Result<D::Program> {
        self.create_program_at(ir, entry_name, Location::caller())
    }

    pub(crate) fn create_program_at(
        &self,
        ir: &CompiledProgram,
        entry_name: &str,
        at: &'static Location<'static>,
    ) -> Result<D::Program> {
        let ctx = self.live(at)?;
        if entry_name.is_empty() || entry_name.contains('\0') {
            return Err(Error::precondition_at(format!("invalid program name {entry_name:?}"), at));
        }
        let program = self.check(
            "rtProgramCreateFromPTXString",
            self.driver.program_create_from_ir(ctx, ir.as_bytes(), entry_name),
            at,
        )?;
        self.state.borrow_mut().programs.push(program);
        tracing::debug!("program '{entry_name}' created as {program:?}");
        Ok(program)
    }

    pub fn ray_type_count(&self) -> Option<u32> {
        self.state.borrow().ray_type_count
    }

    pub fn entry_point_count(&self) -> Option<u32> {
        self.state.borrow().entry_point_count
    }

    pub fn stack_size(&self) -> Option<usize> {
        self.state.borrow().stack_size
    }

    pub fn ray_generation_program(&self) -> Option<D::Program> {
        self.state.borrow().ray_generation
    }

    pub fn exception_program(&self) -> Option<D::Program> {
        self.state.borrow().exception
    }

    pub fn program_count(&self) -> usize {
        self.state.borrow().programs.len()
    }

    pub fn variable_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.state.borrow().variables.keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn live(&self, at: &'static Location<'static>) -> Result<D::Context> {
        self.handle
            .ok_or_else(|| Error::precondition_at("context used before init or after destroy", at))
    }

    /// Checks a native result, asking the live context to describe failures.
    pub(crate) fn check<T>(
        &self,
        call: &'static str,
        result: std::result::Result<T, NativeCode>,
        at: &'static Location<'static>,
    ) -> Result<T> {
        error::check(call, result, at, |code| {
            self.handle.and_then(|ctx| self.driver.context_error_string(ctx, code))
        })
    }
}

impl<D: Driver> Drop for DeviceContext<D> {
    fn drop(&mut self) {
        if let Some(ctx) = self.handle.take() {
            tracing::warn!("context {ctx:?} dropped without destroy()");
            if let Err(code) = self.driver.context_destroy(ctx) {
                tracing::warn!("releasing context {ctx:?} failed with {code}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::host::HostDriver;

    fn ir() -> CompiledProgram {
        CompiledProgram::from_ir(
            b".visible .entry generatePrimaryRay()\n{\n}\n.visible .entry exception()\n{\n}\n"
                .to_vec(),
        )
    }

    fn live_context() -> DeviceContext<HostDriver> {
        let mut context = DeviceContext::new(HostDriver::new());
        context.init().unwrap();
        context
    }

    #[test]
    fn init_twice_is_fatal() {
        let mut context = live_context();
        let err = context.init().unwrap_err();
        assert!(matches!(err, Error::Precondition { .. }));
        assert_eq!(context.driver().live_contexts(), 1);
        context.destroy().unwrap();
    }

    #[test]
    fn destroy_without_init_is_fatal() {
        let mut context = DeviceContext::new(HostDriver::new());
        assert!(matches!(context.destroy(), Err(Error::Precondition { .. })));
    }

    #[test]
    fn init_and_destroy_alternate() {
        let mut context = DeviceContext::new(HostDriver::new());
        for _ in 0..3 {
            context.init().unwrap();
            context.set_ray_type_count(2).unwrap();
            context.destroy().unwrap();
            assert!(context.handle().is_none());
            assert_eq!(context.ray_type_count(), None);
            assert!(context.destroy().is_err());
        }
        assert_eq!(context.driver().live_contexts(), 0);
    }

    #[test]
    fn positive_counts_succeed() {
        let mut context = live_context();
        for n in [1u32, 2, 7, 64, u32::MAX] {
            context.set_ray_type_count(n).unwrap();
            context.set_stack_size(n as usize).unwrap();
            let ctx = context.handle().unwrap();
            assert_eq!(context.driver().ray_type_count(ctx), Some(n));
            assert_eq!(context.driver().stack_size(ctx), Some(n as usize));
        }
        context.destroy().unwrap();
    }

    #[test]
    fn zero_counts_are_fatal() {
        let mut context = live_context();
        assert!(matches!(context.set_ray_type_count(0), Err(Error::Precondition { .. })));
        assert!(matches!(context.set_stack_size(0), Err(Error::Precondition { .. })));
        assert!(matches!(context.set_entry_point_count(0), Err(Error::Precondition { .. })));
        context.destroy().unwrap();
    }

    #[test]
    fn setters_before_init_are_fatal() {
        let context = DeviceContext::new(HostDriver::new());
        assert!(context.set_ray_type_count(1).is_err());
        assert!(context.set_stack_size(14000).is_err());
        assert!(context.declare_variable("renderData").is_err());
        assert!(context.set_exception_program(&ir(), "exception").is_err());
    }

    #[test]
    fn ray_generation_resets_entry_point_count() {
        let mut context = live_context();
        context.set_entry_point_count(4).unwrap();
        context.set_ray_generation_program(&ir(), "generatePrimaryRay").unwrap();
        assert_eq!(context.entry_point_count(), Some(1));

        let ctx = context.handle().unwrap();
        assert_eq!(context.driver().entry_point_count(ctx), Some(1));
        let program = context.ray_generation_program().unwrap();
        assert_eq!(context.driver().ray_generation_program(ctx, ENTRY_POINT), Some(program));
        let name = context.driver().program_entry_name(program);
        assert_eq!(name.as_deref(), Some("generatePrimaryRay"));
        context.destroy().unwrap();
    }

    #[test]
    fn exception_program_is_installed() {
        let mut context = live_context();
        context.set_ray_generation_program(&ir(), "generatePrimaryRay").unwrap();
        context.set_exception_program(&ir(), "exception").unwrap();
        let ctx = context.handle().unwrap();
        assert_eq!(
            context.driver().exception_program(ctx, ENTRY_POINT),
            context.exception_program()
        );
        assert_eq!(context.program_count(), 2);
        context.destroy().unwrap();
    }

    #[test]
    fn unresolved_entry_name_reports_code_and_context_message() {
        let mut context = live_context();
        let err = context.set_ray_generation_program(&ir(), "missingProgram").unwrap_err();
        assert_eq!(err.code(), Some(NativeCode::ILLEGAL_SYMBOL));
        let text = err.to_string();
        assert!(text.contains("missingProgram"), "{text}");
        assert!(text.contains("context.rs"), "{text}");
        context.destroy().unwrap();
    }

    #[test]
    fn duplicate_variable_is_rejected() {
        let mut context = live_context();
        {
            let _first = context.declare_variable("renderData").unwrap();
            let again = context.declare_variable("renderData");
            assert!(matches!(again, Err(Error::Precondition { .. })));
            assert!(context.declare_variable("").is_err());
        }
        assert_eq!(context.variable_names(), vec!["renderData".to_string()]);
        context.destroy().unwrap();
    }

    #[test]
    fn native_failure_on_create_has_no_context_detail() {
        let driver = HostDriver::new();
        driver.inject_failure("rtContextCreate", NativeCode::NO_DEVICE);
        let mut context = DeviceContext::new(driver);
        let err = context.init().unwrap_err();
        assert_eq!(err.code(), Some(NativeCode::NO_DEVICE));
        assert!(!context.is_live());
    }
}
