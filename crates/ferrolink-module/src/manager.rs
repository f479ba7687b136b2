use crate::error::ModuleError;
use crate::loader::{ModuleHandle, ModuleLoader};
use crate::DEFAULT_CAPACITY;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use tracing::{debug, info};

struct ModuleRecord {
    handle: ModuleHandle,
    sha256: [u8; 32],
    size: usize,
    loaded_at: SystemTime,
    executing: bool,
}

/// Registry snapshot entry, as returned by [`ModuleManager::list`].
#[derive(Debug, Clone)]
pub struct ModuleInfo {
    /// Registry identifier
    pub identifier: String,
    /// Code size in bytes
    pub size: usize,
    /// Verified digest of the code
    pub sha256: [u8; 32],
    /// When the module was activated
    pub loaded_at: SystemTime,
    /// Whether the module is running right now
    pub executing: bool,
}

/// Result of one module execution.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    /// Output captured from the module
    pub output: String,
    /// Wall clock time the run took
    pub duration: Duration,
}

/// Fixed-capacity registry of loaded modules.
///
/// A single mutex guards the slot table; compilation and execution both
/// happen outside it, with an in-flight flag marking modules that are
/// currently running. Loading under an occupied identifier replaces the
/// previous module in its slot.
pub struct ModuleManager {
    loader: Arc<dyn ModuleLoader>,
    modules: Mutex<HashMap<String, ModuleRecord>>,
    capacity: usize,
}

impl ModuleManager {
    /// Registry with the default slot count.
    pub fn new(loader: Arc<dyn ModuleLoader>) -> Self {
        Self::with_capacity(loader, DEFAULT_CAPACITY)
    }

    /// Registry with an explicit slot count.
    pub fn with_capacity(loader: Arc<dyn ModuleLoader>, capacity: usize) -> Self {
        Self {
            loader,
            modules: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Verify, compile, and register a module.
    ///
    /// The code's digest must match `expected_sha256` before anything is
    /// compiled. A module already registered under `identifier` is
    /// replaced, unless it is executing.
    pub async fn load(
        &self,
        identifier: &str,
        expected_sha256: &[u8; 32],
        code: &[u8],
    ) -> Result<(), ModuleError> {
        let digest: [u8; 32] = Sha256::digest(code).into();
        if &digest != expected_sha256 {
            return Err(ModuleError::Integrity(identifier.to_owned()));
        }

        // Slot availability is checked before the (possibly expensive)
        // compile, and re-checked at insert since the lock was released.
        self.check_slot(identifier)?;
        let handle = self.loader.load(identifier, code).await?;

        let mut modules = self.lock();
        match modules.get(identifier) {
            Some(record) if record.executing => {
                return Err(ModuleError::Busy(identifier.to_owned()))
            }
            Some(_) => {
                debug!(identifier, "replacing module in slot");
            }
            None if modules.len() >= self.capacity => {
                return Err(ModuleError::RegistryFull {
                    capacity: self.capacity,
                })
            }
            None => {}
        }
        modules.insert(
            identifier.to_owned(),
            ModuleRecord {
                handle,
                sha256: digest,
                size: code.len(),
                loaded_at: SystemTime::now(),
                executing: false,
            },
        );
        info!(identifier, size = code.len(), "module loaded");
        Ok(())
    }

    /// Run a loaded module.
    ///
    /// The registry lock is held only to flip the in-flight flag; the
    /// run itself happens outside it. A module can run at most once at
    /// a time.
    pub async fn execute(
        &self,
        identifier: &str,
        args: &[String],
    ) -> Result<ExecOutcome, ModuleError> {
        let handle = {
            let mut modules = self.lock();
            let record = modules
                .get_mut(identifier)
                .ok_or_else(|| ModuleError::NotLoaded(identifier.to_owned()))?;
            if record.executing {
                return Err(ModuleError::Busy(identifier.to_owned()));
            }
            record.executing = true;
            record.handle.clone()
        };
        let _guard = ExecGuard {
            modules: &self.modules,
            identifier,
        };

        let start = Instant::now();
        let output = self.loader.execute(identifier, &handle, args).await?;
        let duration = start.elapsed();
        debug!(identifier, ?duration, "module executed");
        Ok(ExecOutcome { output, duration })
    }

    /// Drop a module from the registry. The handle itself is released
    /// when its last clone goes away.
    pub fn unload(&self, identifier: &str) -> Result<(), ModuleError> {
        let mut modules = self.lock();
        match modules.get(identifier) {
            None => Err(ModuleError::NotLoaded(identifier.to_owned())),
            Some(record) if record.executing => Err(ModuleError::Busy(identifier.to_owned())),
            Some(_) => {
                modules.remove(identifier);
                info!(identifier, "module unloaded");
                Ok(())
            }
        }
    }

    /// Snapshot of every registered module.
    pub fn list(&self) -> Vec<ModuleInfo> {
        let modules = self.lock();
        let mut infos: Vec<ModuleInfo> = modules
            .iter()
            .map(|(identifier, record)| ModuleInfo {
                identifier: identifier.clone(),
                size: record.size,
                sha256: record.sha256,
                loaded_at: record.loaded_at,
                executing: record.executing,
            })
            .collect();
        infos.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        infos
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no module is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_slot(&self, identifier: &str) -> Result<(), ModuleError> {
        let modules = self.lock();
        if !modules.contains_key(identifier) && modules.len() >= self.capacity {
            return Err(ModuleError::RegistryFull {
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ModuleRecord>> {
        self.modules.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Clears the in-flight flag when execution finishes, traps, or is
/// cancelled.
struct ExecGuard<'a> {
    modules: &'a Mutex<HashMap<String, ModuleRecord>>,
    identifier: &'a str,
}

impl Drop for ExecGuard<'_> {
    fn drop(&mut self) {
        let mut modules = self
            .modules
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(record) = modules.get_mut(self.identifier) {
            record.executing = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Loader whose modules echo their arguments, after an optional
    /// pause.
    struct EchoLoader {
        delay: Duration,
    }

    impl EchoLoader {
        fn immediate() -> Arc<Self> {
            Arc::new(Self {
                delay: Duration::ZERO,
            })
        }
    }

    #[async_trait]
    impl ModuleLoader for EchoLoader {
        async fn load(&self, _identifier: &str, code: &[u8]) -> Result<ModuleHandle, ModuleError> {
            Ok(ModuleHandle::new(code.to_vec()))
        }

        async fn execute(
            &self,
            _identifier: &str,
            _handle: &ModuleHandle,
            args: &[String],
        ) -> Result<String, ModuleError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(args.join(" "))
        }
    }

    fn digest(code: &[u8]) -> [u8; 32] {
        Sha256::digest(code).into()
    }

    #[tokio::test]
    async fn load_then_execute() {
        let manager = ModuleManager::new(EchoLoader::immediate());
        manager.load("echo", &digest(b"code"), b"code").await.unwrap();
        let outcome = manager
            .execute("echo", &["hello".into(), "world".into()])
            .await
            .unwrap();
        assert_eq!(outcome.output, "hello world");
    }

    #[tokio::test]
    async fn digest_mismatch_rejected_before_load() {
        let manager = ModuleManager::new(EchoLoader::immediate());
        let err = manager
            .load("echo", &[0u8; 32], b"code")
            .await
            .unwrap_err();
        assert!(matches!(err, ModuleError::Integrity(_)));
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn execute_unknown_module() {
        let manager = ModuleManager::new(EchoLoader::immediate());
        let err = manager.execute("ghost", &[]).await.unwrap_err();
        assert!(matches!(err, ModuleError::NotLoaded(_)));
    }

    #[tokio::test]
    async fn registry_capacity_enforced_with_replacement_allowed() {
        let manager = ModuleManager::with_capacity(EchoLoader::immediate(), 2);
        manager.load("a", &digest(b"1"), b"1").await.unwrap();
        manager.load("b", &digest(b"2"), b"2").await.unwrap();

        let err = manager.load("c", &digest(b"3"), b"3").await.unwrap_err();
        assert!(matches!(err, ModuleError::RegistryFull { capacity: 2 }));

        // Replacing an occupied slot is fine at capacity.
        manager.load("a", &digest(b"4"), b"4").await.unwrap();
        assert_eq!(manager.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_execution_rejected() {
        let loader = Arc::new(EchoLoader {
            delay: Duration::from_millis(200),
        });
        let manager = Arc::new(ModuleManager::new(loader));
        manager.load("slow", &digest(b"s"), b"s").await.unwrap();

        let first = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.execute("slow", &[]).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = manager.execute("slow", &[]).await.unwrap_err();
        assert!(matches!(err, ModuleError::Busy(_)));
        first.await.unwrap().unwrap();

        // Flag cleared: the module runs again.
        manager.execute("slow", &[]).await.unwrap();
    }

    #[tokio::test]
    async fn replace_while_executing_rejected() {
        let loader = Arc::new(EchoLoader {
            delay: Duration::from_millis(200),
        });
        let manager = Arc::new(ModuleManager::new(loader));
        manager.load("slow", &digest(b"s"), b"s").await.unwrap();

        let running = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.execute("slow", &[]).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = manager.load("slow", &digest(b"t"), b"t").await.unwrap_err();
        assert!(matches!(err, ModuleError::Busy(_)));
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn list_reports_registered_modules() {
        let manager = ModuleManager::new(EchoLoader::immediate());
        manager.load("b", &digest(b"2"), b"2").await.unwrap();
        manager.load("a", &digest(b"1"), b"1").await.unwrap();

        let infos = manager.list();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].identifier, "a");
        assert_eq!(infos[1].identifier, "b");
        assert!(!infos[0].executing);
        assert_eq!(infos[0].size, 1);
    }

    #[tokio::test]
    async fn unload_frees_slot() {
        let manager = ModuleManager::with_capacity(EchoLoader::immediate(), 1);
        manager.load("a", &digest(b"1"), b"1").await.unwrap();
        manager.unload("a").unwrap();
        assert!(matches!(
            manager.unload("a").unwrap_err(),
            ModuleError::NotLoaded(_)
        ));
        manager.load("b", &digest(b"2"), b"2").await.unwrap();
    }
}
