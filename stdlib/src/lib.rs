pub mod base;
pub mod coroutine;
pub mod debug;


use anyhow::Result;
use tidal_core::{Runtime, module::ModuleRegistry};

/// Register all stdlib modules with the given registry
pub fn register_stdlib_modules(registry: &mut ModuleRegistry) -> Result<()> {
    registry.register_module(Box::new(base::BaseModule::new()))?;
    registry.register_module(Box::new(coroutine::CoroutineModule::new()))?;
    registry.register_module(Box::new(debug::DebugModule::new()))?;
    Ok(())
}

/// Registry holding every stdlib module.
pub fn registry() -> Result<ModuleRegistry> {
    let mut registry = ModuleRegistry::new();
    register_stdlib_modules(&mut registry)?;
    Ok(registry)
}

/// Install the full stdlib into `runtime`'s globals.
pub fn install(runtime: &mut Runtime) -> Result<()> {
    runtime.install(&registry()?)
}
