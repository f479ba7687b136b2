use thiserror::Error;

/// Errors surfaced by the module subsystem.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// No module is loaded under the given identifier.
    #[error("module {0} is not loaded")]
    NotLoaded(String),

    /// The module is currently executing and cannot be replaced or run
    /// concurrently.
    #[error("module {0} is busy")]
    Busy(String),

    /// The supplied code did not match its declared digest.
    #[error("integrity verification failed for module {0}")]
    Integrity(String),

    /// Every registry slot is occupied by a different module.
    #[error("module registry is full ({capacity} slots)")]
    RegistryFull {
        /// Configured slot count
        capacity: usize,
    },

    /// The code could not be compiled or instantiated.
    #[error("module load failed: {0}")]
    Load(String),

    /// The module trapped, ran out of fuel, or otherwise failed while
    /// running.
    #[error("module execution failed: {0}")]
    Exec(String),

    /// Execution exceeded the wall clock deadline.
    #[error("module {identifier} exceeded its execution deadline")]
    Timeout {
        /// Identifier of the overdue module
        identifier: String,
    },
}
