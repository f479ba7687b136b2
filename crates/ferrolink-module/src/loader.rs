use crate::error::ModuleError;
use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;

/// Opaque handle to a loaded module.
///
/// The registry stores handles without knowing the loader's concrete
/// module type; the loader downcasts when asked to execute.
#[derive(Clone)]
pub struct ModuleHandle(Arc<dyn Any + Send + Sync>);

impl ModuleHandle {
    /// Wrap a loader-specific module value.
    pub fn new<T: Any + Send + Sync>(inner: T) -> Self {
        Self(Arc::new(inner))
    }

    /// Recover the concrete module type, if it matches.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.0.clone().downcast::<T>().ok()
    }
}

impl std::fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ModuleHandle")
    }
}

/// Compiles and runs modules of one particular format.
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    /// Compile `code` into an executable module.
    async fn load(&self, identifier: &str, code: &[u8]) -> Result<ModuleHandle, ModuleError>;

    /// Run a previously loaded module and capture its output.
    async fn execute(
        &self,
        identifier: &str,
        handle: &ModuleHandle,
        args: &[String],
    ) -> Result<String, ModuleError>;
}
