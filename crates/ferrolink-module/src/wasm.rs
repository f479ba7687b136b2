use crate::error::ModuleError;
use crate::loader::{ModuleHandle, ModuleLoader};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;
use wasmtime::{Engine, Linker, Module, Store};

/// Execution limits for WebAssembly modules.
#[derive(Debug, Clone)]
pub struct WasmConfig {
    /// Fuel budget per execution; a run that exhausts it traps
    pub fuel: u64,
    /// Wall clock deadline per execution
    pub exec_timeout: Duration,
    /// Largest accepted module binary, in bytes
    pub max_module_size: usize,
}

impl Default for WasmConfig {
    fn default() -> Self {
        Self {
            fuel: 1_000_000_000,
            exec_timeout: Duration::from_secs(30),
            max_module_size: 16 * 1024 * 1024,
        }
    }
}

/// Runs WebAssembly modules under wasmtime.
///
/// Modules are compiled once at load and instantiated fresh for every
/// execution, so runs never observe each other's state. The entrypoint
/// is the first of the exported functions `run` (returning an `i32`
/// that becomes the output), `_start`, or `main`. Arguments are not
/// passed to WebAssembly modules.
pub struct WasmLoader {
    engine: Engine,
    config: WasmConfig,
}

impl WasmLoader {
    /// Build a loader with the given limits.
    pub fn new(config: WasmConfig) -> Result<Self, ModuleError> {
        let mut engine_config = wasmtime::Config::new();
        engine_config.async_support(true);
        engine_config.consume_fuel(true);
        let engine =
            Engine::new(&engine_config).map_err(|e| ModuleError::Load(e.to_string()))?;
        Ok(Self { engine, config })
    }

    async fn run(&self, module: &Module) -> Result<String, ModuleError> {
        let mut store = Store::new(&self.engine, ());
        store
            .set_fuel(self.config.fuel)
            .map_err(|e| ModuleError::Exec(e.to_string()))?;
        store
            .fuel_async_yield_interval(Some(10_000))
            .map_err(|e| ModuleError::Exec(e.to_string()))?;

        let linker: Linker<()> = Linker::new(&self.engine);
        let instance = linker
            .instantiate_async(&mut store, module)
            .await
            .map_err(|e| ModuleError::Exec(e.to_string()))?;

        if let Ok(run) = instance.get_typed_func::<(), i32>(&mut store, "run") {
            let value = run
                .call_async(&mut store, ())
                .await
                .map_err(|e| ModuleError::Exec(e.to_string()))?;
            return Ok(value.to_string());
        }
        for name in ["_start", "main"] {
            if let Ok(entry) = instance.get_typed_func::<(), ()>(&mut store, name) {
                entry
                    .call_async(&mut store, ())
                    .await
                    .map_err(|e| ModuleError::Exec(e.to_string()))?;
                return Ok(String::new());
            }
        }
        Err(ModuleError::Exec(
            "module exports no entrypoint (run, _start, or main)".into(),
        ))
    }
}

#[async_trait]
impl ModuleLoader for WasmLoader {
    async fn load(&self, identifier: &str, code: &[u8]) -> Result<ModuleHandle, ModuleError> {
        if code.len() > self.config.max_module_size {
            return Err(ModuleError::Load(format!(
                "module is {} bytes, limit is {}",
                code.len(),
                self.config.max_module_size
            )));
        }
        let module =
            Module::new(&self.engine, code).map_err(|e| ModuleError::Load(e.to_string()))?;
        debug!(identifier, size = code.len(), "compiled wasm module");
        Ok(ModuleHandle::new(module))
    }

    async fn execute(
        &self,
        identifier: &str,
        handle: &ModuleHandle,
        _args: &[String],
    ) -> Result<String, ModuleError> {
        let module = handle
            .downcast::<Module>()
            .ok_or_else(|| ModuleError::Exec("handle is not a wasm module".into()))?;
        tokio::time::timeout(self.config.exec_timeout, self.run(&module))
            .await
            .map_err(|_| ModuleError::Timeout {
                identifier: identifier.to_owned(),
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loader() -> WasmLoader {
        WasmLoader::new(WasmConfig {
            fuel: 500_000,
            exec_timeout: Duration::from_secs(5),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn run_entrypoint_yields_value() {
        let loader = loader();
        let code = wat::parse_str(r#"(module (func (export "run") (result i32) i32.const 7))"#)
            .unwrap();
        let handle = loader.load("seven", &code).await.unwrap();
        let output = loader.execute("seven", &handle, &[]).await.unwrap();
        assert_eq!(output, "7");
    }

    #[tokio::test]
    async fn start_entrypoint_runs_silently() {
        let loader = loader();
        let code = wat::parse_str(r#"(module (func (export "_start")))"#).unwrap();
        let handle = loader.load("noop", &code).await.unwrap();
        let output = loader.execute("noop", &handle, &[]).await.unwrap();
        assert_eq!(output, "");
    }

    #[tokio::test]
    async fn runaway_module_runs_out_of_fuel() {
        let loader = loader();
        let code =
            wat::parse_str(r#"(module (func (export "_start") (loop $l (br $l))))"#).unwrap();
        let handle = loader.load("spin", &code).await.unwrap();
        let err = loader.execute("spin", &handle, &[]).await.unwrap_err();
        assert!(matches!(err, ModuleError::Exec(_)));
    }

    #[tokio::test]
    async fn invalid_code_rejected_at_load() {
        let loader = loader();
        let err = loader.load("bad", b"definitely not wasm").await.unwrap_err();
        assert!(matches!(err, ModuleError::Load(_)));
    }

    #[tokio::test]
    async fn oversized_module_rejected() {
        let loader = WasmLoader::new(WasmConfig {
            max_module_size: 4,
            ..Default::default()
        })
        .unwrap();
        let err = loader.load("big", &[0u8; 16]).await.unwrap_err();
        assert!(matches!(err, ModuleError::Load(_)));
    }

    #[tokio::test]
    async fn module_without_entrypoint_rejected() {
        let loader = loader();
        let code = wat::parse_str("(module)").unwrap();
        let handle = loader.load("empty", &code).await.unwrap();
        let err = loader.execute("empty", &handle, &[]).await.unwrap_err();
        assert!(matches!(err, ModuleError::Exec(_)));
    }

    #[tokio::test]
    async fn executions_do_not_share_state() {
        let loader = loader();
        // A global counter would leak across runs if the instance were
        // reused.
        let code = wat::parse_str(
            r#"(module
                (global $n (mut i32) (i32.const 0))
                (func (export "run") (result i32)
                    (global.set $n (i32.add (global.get $n) (i32.const 1)))
                    (global.get $n)))"#,
        )
        .unwrap();
        let handle = loader.load("counter", &code).await.unwrap();
        assert_eq!(loader.execute("counter", &handle, &[]).await.unwrap(), "1");
        assert_eq!(loader.execute("counter", &handle, &[]).await.unwrap(), "1");
    }
}
