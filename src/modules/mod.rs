//! 模块：定义、触发器、仓库与目录加载

pub mod loader;
pub mod model;
pub mod repository;
pub mod trigger;

pub use loader::{load_module_file, ModuleLoader};
pub use model::{Module, ModuleError, ModuleKind};
pub use repository::{InMemoryModuleRepository, ModuleFilter, ModuleRepository};
pub use trigger::should_run;
