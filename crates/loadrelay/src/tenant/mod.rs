//! Tenant key handling.

pub mod key;

/// Tenant used for records that carry no usable tenant key.
pub const UNKNOWN_TENANT: &str = "unknown-brokerage";

/// Normalized key used to partition storage. Keys that normalize to nothing
/// are filed under [`UNKNOWN_TENANT`].
pub fn storage_key(raw: &str) -> String {
    let canonical = key::normalize(raw);
    if canonical.is_empty() {
        UNKNOWN_TENANT.to_string()
    } else {
        canonical
    }
}

pub use key::{
    consolidate, consolidate_all, consolidate_all_with, consolidate_with, find_all_by_variant,
    find_by_variant, is_canonical, migrate_keys, migration_report, normalize, variants,
    EmptyValue, MigrationReport,
};
