use std::collections::BTreeMap;
use std::panic::Location;

use crate::compiler::CompiledProgram;
use crate::context::DeviceContext;
use crate::driver::Driver;
use crate::error::{Error, Result};

/// Programs bound to one ray-type slot of a material.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HitPrograms<P> {
    pub closest_hit: Option<P>,
    pub any_hit: Option<P>,
}

impl<P> Default for HitPrograms<P> {
    fn default() -> Self {
        Self { closest_hit: None, any_hit: None }
    }
}

#[derive(Clone, Copy)]
enum HitKind {
    Closest,
    Any,
}

/// Shading behavior bound to one context for its whole life.
///
/// Created ready to configure; there is no separate `init`. Call
/// [`Material::destroy`] before the context is destroyed, which the borrow
/// on the context enforces.
pub struct Material<'c, D: Driver> {
    context: &'c DeviceContext<D>,
    handle: Option<D::Material>,
    slots: BTreeMap<u32, HitPrograms<D::Program>>,
}

impl<'c, D: Driver> Material<'c, D> {
    #[track_caller]
    pub fn new(context: &'c DeviceContext<D>) -> Result<Self> {
        let at = Location::caller();
        let ctx = context.live(at)?;
        let handle = context.check("rtMaterialCreate", context.driver().material_create(ctx), at)?;
        Ok(Self { context, handle: Some(handle), slots: BTreeMap::new() })
    }

    pub fn handle(&self) -> Option<D::Material> {
        self.handle
    }

    pub fn is_live(&self) -> bool {
        self.handle.is_some()
    }

    pub fn hit_programs(&self, ray_type: u32) -> HitPrograms<D::Program> {
        self.slots.get(&ray_type).copied().unwrap_or_default()
    }

    #[track_caller]
    pub fn set_closest_hit_program(
        &mut self,
        ir: &CompiledProgram,
        ray_type: u32,
        entry_name: &str,
    ) -> Result<()> {
        self.bind(HitKind::Closest, ir, ray_type, entry_name, Location::caller())
    }

    #[track_caller]
    pub fn set_any_hit_program(
        &mut self,
        ir: &CompiledProgram,
        ray_type: u32,
        entry_name: &str,
    ) -> Result<()> {
        self.bind(HitKind::Any, ir, ray_type, entry_name, Location::caller())
    }

    #[track_caller]
    pub fn destroy(&mut self) -> Result<()> {
        let at = Location::caller();
        let material = self.live(at)?;
        let result = self.context.driver().material_destroy(material);
        self.context.check("rtMaterialDestroy", result, at)?;
        self.handle = None;
        self.slots.clear();
        Ok(())
    }

    fn live(&self, at: &'static Location<'static>) -> Result<D::Material> {
        self.handle
            .ok_or_else(|| Error::precondition_at("material used after destroy", at))
    }

    fn bind(
        &mut self,
        kind: HitKind,
        ir: &CompiledProgram,
        ray_type: u32,
        entry_name: &str,
        at: &'static Location<'static>,
    ) -> Result<()> {
        let material = self.live(at)?;
        match self.context.ray_type_count() {
            Some(count) if ray_type < count => {}
            Some(count) => {
                return Err(Error::precondition_at(
                    format!("ray type {ray_type} out of range, context has {count}"),
                    at,
                ));
            }
            None => {
                return Err(Error::precondition_at("ray type count not configured on context", at));
            }
        }

        let program = self.context.create_program_at(ir, entry_name, at)?;
        let driver = self.context.driver();
        match kind {
            HitKind::Closest => {
                self.context.check(
                    "rtMaterialSetClosestHitProgram",
                    driver.material_set_closest_hit_program(material, ray_type, program),
                    at,
                )?;
                self.slots.entry(ray_type).or_default().closest_hit = Some(program);
            }
            HitKind::Any => {
                self.context.check(
                    "rtMaterialSetAnyHitProgram",
                    driver.material_set_any_hit_program(material, ray_type, program),
                    at,
                )?;
                self.slots.entry(ray_type).or_default().any_hit = Some(program);
            }
        }
        Ok(())
    }
}

impl<D: Driver> Drop for Material<'_, D> {
    fn drop(&mut self) {
        if let Some(material) = self.handle.take() {
            tracing::warn!("material {material:?} dropped without destroy()");
            if let Err(code) = self.context.driver().material_destroy(material) {
                tracing::warn!("releasing material {material:?} failed with {code}");
            }
        }
    }
}
