use std::cell::Cell;
use std::panic::Location;

use bytemuck::Pod;

use crate::context::DeviceContext;
use crate::driver::Driver;
use crate::error::{Error, Result};

/// A named slot of raw bytes visible to device code.
///
/// The native layer infers the slot's type from the size of the first
/// payload, so every later [`Variable::set`] must write the same number of
/// bytes; a different size is rejected as a caller error.
pub struct Variable<'c, D: Driver> {
    context: &'c DeviceContext<D>,
    name: String,
    handle: D::Variable,
    size: Cell<Option<usize>>,
}

impl<'c, D: Driver> Variable<'c, D> {
    pub(crate) fn new(context: &'c DeviceContext<D>, name: &str, handle: D::Variable) -> Self {
        Self { context, name: name.to_string(), handle, size: Cell::new(None) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> D::Variable {
        self.handle
    }

    /// Payload size fixed by the first successful `set`.
    pub fn size(&self) -> Option<usize> {
        self.size.get()
    }

    #[track_caller]
    pub fn set(&self, bytes: &[u8]) -> Result<()> {
        let at = Location::caller();
        self.context.live(at)?;
        if bytes.is_empty() {
            let what = format!("empty payload for variable '{}'", self.name);
            return Err(Error::precondition_at(what, at));
        }
        if let Some(size) = self.size.get().filter(|&size| size != bytes.len()) {
            return Err(Error::precondition_at(
                format!("variable '{}' holds {size} bytes, got {}", self.name, bytes.len()),
                at,
            ));
        }
        self.context.check(
            "rtVariableSetUserData",
            self.context.driver().variable_set_user_data(self.handle, bytes),
            at,
        )?;
        self.size.set(Some(bytes.len()));
        Ok(())
    }

    /// Copies `value` byte for byte into the slot.
    #[track_caller]
    pub fn set_value<T: Pod>(&self, value: &T) -> Result<()> {
        self.set(bytemuck::bytes_of(value))
    }
}
