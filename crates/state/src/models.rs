//! Rows of the tool's own metadata tables.

use time::OffsetDateTime;

/// One row of `migrations`, keyed by (keyspace_name, service, file).
///
/// A row with `success = false` and a non-null `applied_on` marks a
/// migration whose apply started but never finished; it is terminal until an
/// operator repairs it.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationRow {
    pub keyspace_name: String,
    pub service: String,
    pub file: String,
    pub applied_on: Option<OffsetDateTime>,
    pub checksum: Option<String>,
    pub success: bool,
    pub body: Option<String>,
}

/// One row of `bootstraps`, clustered by `applied_on`: every attempt appends
/// a new row.
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapRow {
    pub keyspace_name: String,
    pub applied_on: OffsetDateTime,
    pub file: String,
    pub success: bool,
    pub body: String,
}
