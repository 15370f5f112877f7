//! Script coordinates and statement splitting.
//!
//! A script's role is derived purely from its path depth relative to the
//! migration root: the init script sits at the root, each keyspace directory
//! holds one bootstrap script, and each service directory under a keyspace
//! holds that service's ordered migrations. Anything else is ignored.

use std::path::Path;

/// The file extension a script must carry to be considered at all.
pub const SCRIPT_EXTENSION: &str = ".cql";

/// A script's role and coordinates, derived from its relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptKind {
    /// The single depth-0 script that creates the tool's own keyspace and
    /// metadata tables. Never recorded in the state store.
    Init,
    /// A per-keyspace setup script, re-applied on every run.
    Bootstrap { keyspace: String },
    /// A per-(keyspace, service) ordered migration, applied at most once
    /// successfully and checksum-locked thereafter.
    Migration {
        keyspace: String,
        service: String,
        file: String,
    },
}

/// Classify a path relative to the migration root.
///
/// Classification is by depth alone. A file named like the bootstrap script
/// two levels deep is a migration; a file named like the init script below
/// the root is ignored. Filenames are case-sensitive and only `.cql` files
/// are considered.
pub fn classify(relative: &Path, init_filename: &str, bootstrap_filename: &str) -> Option<ScriptKind> {
    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            std::path::Component::Normal(segment) => segments.push(segment.to_str()?),
            _ => return None,
        }
    }
    let file = *segments.last()?;
    if !file.ends_with(SCRIPT_EXTENSION) {
        return None;
    }
    match segments.as_slice() {
        [name] if *name == init_filename => Some(ScriptKind::Init),
        [keyspace, name] if *name == bootstrap_filename => Some(ScriptKind::Bootstrap {
            keyspace: (*keyspace).to_string(),
        }),
        [keyspace, service, file] => Some(ScriptKind::Migration {
            keyspace: (*keyspace).to_string(),
            service: (*service).to_string(),
            file: (*file).to_string(),
        }),
        _ => None,
    }
}

/// Split a canonical body into executable statements.
///
/// Statements are separated by `;`; empty and whitespace-only segments are
/// skipped.
pub fn statements(canonical: &str) -> impl Iterator<Item = &str> {
    canonical
        .split(';')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn classify_str(path: &str) -> Option<ScriptKind> {
        classify(&PathBuf::from(path), "cqlmigrate.cql", "bootstrap.cql")
    }

    #[test]
    fn classifies_by_depth() {
        assert_eq!(classify_str("cqlmigrate.cql"), Some(ScriptKind::Init));
        assert_eq!(
            classify_str("events/bootstrap.cql"),
            Some(ScriptKind::Bootstrap {
                keyspace: "events".to_string()
            })
        );
        assert_eq!(
            classify_str("events/ingest/001-create.cql"),
            Some(ScriptKind::Migration {
                keyspace: "events".to_string(),
                service: "ingest".to_string(),
                file: "001-create.cql".to_string(),
            })
        );
    }

    #[test]
    fn depth_wins_over_name() {
        // A bootstrap-named file at migration depth is a migration.
        assert_eq!(
            classify_str("events/ingest/bootstrap.cql"),
            Some(ScriptKind::Migration {
                keyspace: "events".to_string(),
                service: "ingest".to_string(),
                file: "bootstrap.cql".to_string(),
            })
        );
        // An init-named file below the root is ignored.
        assert_eq!(classify_str("events/cqlmigrate.cql"), None);
    }

    #[test]
    fn ignores_everything_else() {
        assert_eq!(classify_str("README.md"), None);
        assert_eq!(classify_str("other.cql"), None);
        assert_eq!(classify_str("events/notes.txt"), None);
        assert_eq!(classify_str("a/b/c/too-deep.cql"), None);
        // Case-sensitive extension.
        assert_eq!(classify_str("events/ingest/001.CQL"), None);
    }

    #[test]
    fn splits_statements_and_skips_empties() {
        let canonical = "CREATE TABLE a ( x int ) ; ; INSERT INTO a ( x ) VALUES ( 1 ) ;";
        let parts: Vec<_> = statements(canonical).collect();
        assert_eq!(
            parts,
            vec![
                "CREATE TABLE a ( x int )",
                "INSERT INTO a ( x ) VALUES ( 1 )"
            ]
        );
    }

    #[test]
    fn empty_body_has_no_statements() {
        assert_eq!(statements("").count(), 0);
        assert_eq!(statements(" ; ; ").count(), 0);
    }
}
