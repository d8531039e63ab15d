pub mod config;
pub mod migration;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use config::{read_config, write_config, ConfigError, EngineConfig};
pub use migration::{
    create_registry, freeze_global_registry, register_migration, resolve, ExecutionPlan,
    FailureKind, Migration, MigrationDefinition, MigrationError, MigrationFailure,
    MigrationLedger, MigrationRegistry, MigrationResult, MigrationRunner, RunReport, RunState,
};
pub use store::{update, InMemoryStore, JsonFileStore, KeyValueStore, StoreError};
