//! In-process emulation of the native ray-tracing runtime.
//!
//! Objects live in a table keyed by integer ids. Entry names given to
//! `program_create_from_ir` are resolved against the `.entry` symbols of the
//! IR text, the same symbols the real runtime links against.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

use super::{describe_code, Driver, NativeCode};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContextId(u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProgramId(u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MaterialId(u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VariableId(u32);

#[derive(Default)]
struct ContextEntry {
    ray_type_count: u32,
    entry_point_count: u32,
    stack_size: usize,
    variables: HashMap<String, VariableId>,
    ray_generation: BTreeMap<u32, ProgramId>,
    exception: BTreeMap<u32, ProgramId>,
    last_error: Option<String>,
}

struct ProgramEntry {
    context: ContextId,
    entry_name: String,
}

struct MaterialEntry {
    context: ContextId,
    closest_hit: BTreeMap<u32, ProgramId>,
    any_hit: BTreeMap<u32, ProgramId>,
}

struct VariableEntry {
    context: ContextId,
    data: Option<Vec<u8>>,
}

#[derive(Default)]
struct HostState {
    next_id: u32,
    contexts: HashMap<ContextId, ContextEntry>,
    programs: HashMap<ProgramId, ProgramEntry>,
    materials: HashMap<MaterialId, MaterialEntry>,
    variables: HashMap<VariableId, VariableEntry>,
    injected: Option<(&'static str, NativeCode)>,
}

impl HostState {
    fn next(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn take_injected(&mut self, call: &'static str) -> Result<(), NativeCode> {
        match self.injected {
            Some((target, code)) if target == call => {
                self.injected = None;
                Err(code)
            }
            _ => Ok(()),
        }
    }

    fn context(&mut self, ctx: ContextId) -> Result<&mut ContextEntry, NativeCode> {
        self.contexts.get_mut(&ctx).ok_or(NativeCode::INVALID_CONTEXT)
    }

    /// Records `detail` as the context's last error and returns `code`.
    fn fail(&mut self, ctx: ContextId, code: NativeCode, detail: impl Into<String>) -> NativeCode {
        if let Some(entry) = self.contexts.get_mut(&ctx) {
            entry.last_error = Some(detail.into());
        }
        code
    }

    fn program_in(&mut self, ctx: ContextId, program: ProgramId) -> Result<(), NativeCode> {
        let detail = match self.programs.get(&program).map(|p| p.context) {
            Some(owner) if owner == ctx => return Ok(()),
            Some(_) => format!("{program:?} belongs to another context"),
            None => format!("{program:?} does not exist"),
        };
        Err(self.fail(ctx, NativeCode::INVALID_VALUE, detail))
    }
}

/// Emulated runtime, used when no GPU runtime is linked and by the tests.
#[derive(Default)]
pub struct HostDriver {
    state: RefCell<HostState>,
}

impl HostDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next call named `call` fail with `code`.
    pub fn inject_failure(&self, call: &'static str, code: NativeCode) {
        self.state.borrow_mut().injected = Some((call, code));
    }

    pub fn live_contexts(&self) -> usize {
        self.state.borrow().contexts.len()
    }

    pub fn live_materials(&self) -> usize {
        self.state.borrow().materials.len()
    }

    pub fn live_programs(&self) -> usize {
        self.state.borrow().programs.len()
    }

    pub fn ray_type_count(&self, ctx: ContextId) -> Option<u32> {
        self.state.borrow().contexts.get(&ctx).map(|c| c.ray_type_count)
    }

    pub fn entry_point_count(&self, ctx: ContextId) -> Option<u32> {
        self.state.borrow().contexts.get(&ctx).map(|c| c.entry_point_count)
    }

    pub fn stack_size(&self, ctx: ContextId) -> Option<usize> {
        self.state.borrow().contexts.get(&ctx).map(|c| c.stack_size)
    }

    pub fn ray_generation_program(&self, ctx: ContextId, entry_point: u32) -> Option<ProgramId> {
        self.state.borrow().contexts.get(&ctx)?.ray_generation.get(&entry_point).copied()
    }

    pub fn exception_program(&self, ctx: ContextId, entry_point: u32) -> Option<ProgramId> {
        self.state.borrow().contexts.get(&ctx)?.exception.get(&entry_point).copied()
    }

    pub fn closest_hit_program(&self, material: MaterialId, ray_type: u32) -> Option<ProgramId> {
        self.state.borrow().materials.get(&material)?.closest_hit.get(&ray_type).copied()
    }

    pub fn any_hit_program(&self, material: MaterialId, ray_type: u32) -> Option<ProgramId> {
        self.state.borrow().materials.get(&material)?.any_hit.get(&ray_type).copied()
    }

    pub fn program_entry_name(&self, program: ProgramId) -> Option<String> {
        self.state.borrow().programs.get(&program).map(|p| p.entry_name.clone())
    }

    /// Bytes the device would read from `variable`.
    pub fn variable_bytes(&self, variable: VariableId) -> Option<Vec<u8>> {
        self.state.borrow().variables.get(&variable)?.data.clone()
    }

    pub fn variable_named(&self, ctx: ContextId, name: &str) -> Option<Vec<u8>> {
        let id = *self.state.borrow().contexts.get(&ctx)?.variables.get(name)?;
        self.variable_bytes(id)
    }
}

/// Names following each `.entry` directive in `ir`.
pub fn entry_symbols(ir: &str) -> impl Iterator<Item = &str> {
    ir.split(".entry").skip(1).filter_map(|rest| {
        let rest = rest.trim_start();
        let end = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '$'))
            .unwrap_or(rest.len());
        (end > 0).then(|| &rest[..end])
    })
}

impl Driver for HostDriver {
    type Context = ContextId;
    type Program = ProgramId;
    type Material = MaterialId;
    type Variable = VariableId;

    fn context_create(&self) -> Result<ContextId, NativeCode> {
        let mut state = self.state.borrow_mut();
        state.take_injected("rtContextCreate")?;
        let id = ContextId(state.next());
        state.contexts.insert(id, ContextEntry::default());
        Ok(id)
    }

    fn context_destroy(&self, ctx: ContextId) -> Result<(), NativeCode> {
        let mut state = self.state.borrow_mut();
        state.take_injected("rtContextDestroy")?;
        state.contexts.remove(&ctx).ok_or(NativeCode::INVALID_CONTEXT)?;
        state.programs.retain(|_, p| p.context != ctx);
        state.materials.retain(|_, m| m.context != ctx);
        state.variables.retain(|_, v| v.context != ctx);
        Ok(())
    }

    fn context_set_ray_type_count(&self, ctx: ContextId, count: u32) -> Result<(), NativeCode> {
        let mut state = self.state.borrow_mut();
        state.take_injected("rtContextSetRayTypeCount")?;
        state.context(ctx)?.ray_type_count = count;
        Ok(())
    }

    fn context_set_entry_point_count(&self, ctx: ContextId, count: u32) -> Result<(), NativeCode> {
        let mut state = self.state.borrow_mut();
        state.take_injected("rtContextSetEntryPointCount")?;
        let entry = state.context(ctx)?;
        entry.entry_point_count = count;
        entry.ray_generation.retain(|&slot, _| slot < count);
        entry.exception.retain(|&slot, _| slot < count);
        Ok(())
    }

    fn context_set_stack_size(&self, ctx: ContextId, bytes: usize) -> Result<(), NativeCode> {
        let mut state = self.state.borrow_mut();
        state.take_injected("rtContextSetStackSize")?;
        state.context(ctx)?.stack_size = bytes;
        Ok(())
    }

    fn context_declare_variable(
        &self,
        ctx: ContextId,
        name: &str,
    ) -> Result<VariableId, NativeCode> {
        let mut state = self.state.borrow_mut();
        state.take_injected("rtContextDeclareVariable")?;
        state.context(ctx)?;
        if name.is_empty() {
            return Err(state.fail(ctx, NativeCode::INVALID_VALUE, "empty variable name"));
        }
        if state.contexts[&ctx].variables.contains_key(name) {
            let detail = format!("variable '{name}' already declared");
            return Err(state.fail(ctx, NativeCode::VARIABLE_REDECLARED, detail));
        }
        let id = VariableId(state.next());
        state.variables.insert(id, VariableEntry { context: ctx, data: None });
        state.context(ctx)?.variables.insert(name.to_string(), id);
        Ok(id)
    }

    fn context_set_ray_generation_program(
        &self,
        ctx: ContextId,
        entry_point: u32,
        program: ProgramId,
    ) -> Result<(), NativeCode> {
        let mut state = self.state.borrow_mut();
        state.take_injected("rtContextSetRayGenerationProgram")?;
        let count = state.context(ctx)?.entry_point_count;
        if entry_point >= count {
            let detail = format!("entry point {entry_point} out of range ({count})");
            return Err(state.fail(ctx, NativeCode::INVALID_VALUE, detail));
        }
        state.program_in(ctx, program)?;
        state.context(ctx)?.ray_generation.insert(entry_point, program);
        Ok(())
    }

    fn context_set_exception_program(
        &self,
        ctx: ContextId,
        entry_point: u32,
        program: ProgramId,
    ) -> Result<(), NativeCode> {
        let mut state = self.state.borrow_mut();
        state.take_injected("rtContextSetExceptionProgram")?;
        let count = state.context(ctx)?.entry_point_count;
        if entry_point >= count {
            let detail = format!("entry point {entry_point} out of range ({count})");
            return Err(state.fail(ctx, NativeCode::INVALID_VALUE, detail));
        }
        state.program_in(ctx, program)?;
        state.context(ctx)?.exception.insert(entry_point, program);
        Ok(())
    }

    fn context_error_string(&self, ctx: ContextId, code: NativeCode) -> Option<String> {
        let state = self.state.borrow();
        let name = describe_code(code).unwrap_or("Unknown error");
        match state.contexts.get(&ctx).and_then(|c| c.last_error.as_deref()) {
            Some(detail) => Some(format!("{name} (Details: {detail})")),
            None => Some(name.to_string()),
        }
    }

    fn program_create_from_ir(
        &self,
        ctx: ContextId,
        ir: &[u8],
        entry_name: &str,
    ) -> Result<ProgramId, NativeCode> {
        let mut state = self.state.borrow_mut();
        state.take_injected("rtProgramCreateFromPTXString")?;
        state.context(ctx)?;
        let text = match std::str::from_utf8(ir) {
            Ok(text) if !text.trim().is_empty() => text,
            _ => return Err(state.fail(ctx, NativeCode::INVALID_SOURCE, "IR is empty or not text")),
        };
        if !entry_symbols(text).any(|symbol| symbol == entry_name) {
            return Err(state.fail(
                ctx,
                NativeCode::ILLEGAL_SYMBOL,
                format!("entry point '{entry_name}' not found in IR"),
            ));
        }
        let id = ProgramId(state.next());
        let entry = ProgramEntry { context: ctx, entry_name: entry_name.to_string() };
        state.programs.insert(id, entry);
        Ok(id)
    }

    fn material_create(&self, ctx: ContextId) -> Result<MaterialId, NativeCode> {
        let mut state = self.state.borrow_mut();
        state.take_injected("rtMaterialCreate")?;
        state.context(ctx)?;
        let id = MaterialId(state.next());
        state.materials.insert(
            id,
            MaterialEntry { context: ctx, closest_hit: BTreeMap::new(), any_hit: BTreeMap::new() },
        );
        Ok(id)
    }

    fn material_destroy(&self, material: MaterialId) -> Result<(), NativeCode> {
        let mut state = self.state.borrow_mut();
        state.take_injected("rtMaterialDestroy")?;
        state.materials.remove(&material).map(|_| ()).ok_or(NativeCode::INVALID_VALUE)
    }

    fn material_set_closest_hit_program(
        &self,
        material: MaterialId,
        ray_type: u32,
        program: ProgramId,
    ) -> Result<(), NativeCode> {
        let mut state = self.state.borrow_mut();
        state.take_injected("rtMaterialSetClosestHitProgram")?;
        bind_hit_program(&mut state, material, ray_type, program, |m| &mut m.closest_hit)
    }

    fn material_set_any_hit_program(
        &self,
        material: MaterialId,
        ray_type: u32,
        program: ProgramId,
    ) -> Result<(), NativeCode> {
        let mut state = self.state.borrow_mut();
        state.take_injected("rtMaterialSetAnyHitProgram")?;
        bind_hit_program(&mut state, material, ray_type, program, |m| &mut m.any_hit)
    }

    fn variable_set_user_data(&self, variable: VariableId, bytes: &[u8]) -> Result<(), NativeCode> {
        let mut state = self.state.borrow_mut();
        state.take_injected("rtVariableSetUserData")?;
        let entry = state.variables.get_mut(&variable).ok_or(NativeCode::INVALID_VALUE)?;
        if bytes.is_empty() {
            return Err(NativeCode::INVALID_VALUE);
        }
        match &mut entry.data {
            Some(data) if data.len() != bytes.len() => Err(NativeCode::TYPE_MISMATCH),
            data => {
                *data = Some(bytes.to_vec());
                Ok(())
            }
        }
    }
}

fn bind_hit_program(
    state: &mut HostState,
    material: MaterialId,
    ray_type: u32,
    program: ProgramId,
    slots: impl FnOnce(&mut MaterialEntry) -> &mut BTreeMap<u32, ProgramId>,
) -> Result<(), NativeCode> {
    let ctx = state.materials.get(&material).ok_or(NativeCode::INVALID_VALUE)?.context;
    let count = state.context(ctx)?.ray_type_count;
    if ray_type >= count {
        let detail = format!("ray type {ray_type} out of range ({count})");
        return Err(state.fail(ctx, NativeCode::INVALID_VALUE, detail));
    }
    state.program_in(ctx, program)?;
    if let Some(entry) = state.materials.get_mut(&material) {
        slots(entry).insert(ray_type, program);
    }
    Ok(())
}
