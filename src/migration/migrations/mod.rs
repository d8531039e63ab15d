//! Built-in migrations.
//!
//! Each module exposes a migration type plus a `definition` constructor that
//! fixes its name, run order and dependencies. Add new migrations here and
//! register them in [`crate::migration::create_registry`].

pub mod backfill_record_ids;
pub mod rebuild_record_index;
pub mod schema_init;

pub use backfill_record_ids::BackfillRecordIdsMigration;
pub use rebuild_record_index::RebuildRecordIndexMigration;
pub use schema_init::SchemaInitMigration;
