mod hash;

pub use hash::{compute_hash, compute_sequence_hash};

/// Default location of the JSON file store used by the CLI
pub const DEFAULT_STORE_PATH: &str = ".kvmigrate/store.json";

/// Key holding the set of applied migration names
pub const DEFAULT_LEDGER_KEY: &str = "migrations";

/// Key holding the advisory run-lock marker
pub const DEFAULT_LOCK_KEY: &str = "migrations:lock";
