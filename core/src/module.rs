use std::fmt;

use anyhow::{Result, anyhow, bail};
use tracing::debug;

use crate::{
    val::{TableRef, Val},
    vm::RuntimeState,
};

/// Library installer, one per library table.
///
/// The default [`Module::register`] publishes [`Module::exports`] as a table
/// under the global named [`Module::name`]; libraries that write globals
/// directly override it.
pub trait Module: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn enabled(&self) -> bool {
        true
    }

    /// Functions and constants in export order.
    fn exports(&self) -> Vec<(&'static str, Val)>;

    fn register(&self, state: &RuntimeState) -> Result<()> {
        let lib = TableRef::new();
        for (name, value) in self.exports() {
            lib.set_str(name, value);
        }
        state.globals().set_str(self.name(), Val::Table(lib));
        Ok(())
    }
}

/// Ordered set of modules, installed into a state in registration order.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: Vec<Box<dyn Module>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_module(&mut self, module: Box<dyn Module>) -> Result<()> {
        if self.modules.iter().any(|m| m.name() == module.name()) {
            bail!("module '{}' is already registered", module.name());
        }
        self.modules.push(module);
        Ok(())
    }

    pub fn get_module(&self, name: &str) -> Result<&dyn Module> {
        self.modules
            .iter()
            .find(|m| m.name() == name)
            .map(|m| m.as_ref())
            .ok_or_else(|| anyhow!("module '{}' not found", name))
    }

    pub fn module_names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name()).collect()
    }

    pub fn install(&self, state: &RuntimeState) -> Result<()> {
        for module in self.modules.iter().filter(|m| m.enabled()) {
            debug!(module = module.name(), "install module");
            module
                .register(state)
                .map_err(|err| anyhow!("failed to install module '{}': {err:#}", module.name()))?;
        }
        Ok(())
    }
}
