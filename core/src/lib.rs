pub mod error;
pub mod module;
pub mod op;
pub mod perf;
pub mod rt;
pub mod val;
pub mod vm;

pub use error::RuntimeError;
pub use rt::{Runtime, RuntimeConfig};
pub use val::Val;
