//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Migration run configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MigrateConfig {
    /// Migration root directory holding the script hierarchy.
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Name of the depth-0 init script.
    #[serde(default = "default_init_filename")]
    pub init_filename: String,
    /// Name of the per-keyspace bootstrap script.
    #[serde(default = "default_bootstrap_filename")]
    pub bootstrap_filename: String,
    /// Space-separated cluster contact points.
    #[serde(default = "default_contact_points")]
    pub contact_points: String,
    /// Per-statement client timeout in milliseconds.
    #[serde(default = "default_client_timeout_ms")]
    pub client_timeout_ms: u64,
    /// Schema-agreement poll interval in milliseconds. The wait itself has
    /// no timeout: a hanging cluster is safer than advancing under
    /// disagreement.
    #[serde(default = "default_agreement_poll_ms")]
    pub agreement_poll_ms: u64,
    /// Keyspace owning the tool's metadata tables.
    #[serde(default = "default_meta_keyspace")]
    pub meta_keyspace: String,
    /// Verbose logging.
    #[serde(default)]
    pub debug: bool,
}

fn default_root() -> PathBuf {
    PathBuf::from("/schema")
}

fn default_init_filename() -> String {
    "cqlmigrate.cql".to_string()
}

fn default_bootstrap_filename() -> String {
    "bootstrap.cql".to_string()
}

fn default_contact_points() -> String {
    "localhost".to_string()
}

fn default_client_timeout_ms() -> u64 {
    30_000
}

fn default_agreement_poll_ms() -> u64 {
    1_000
}

fn default_meta_keyspace() -> String {
    "cqldrift".to_string()
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            init_filename: default_init_filename(),
            bootstrap_filename: default_bootstrap_filename(),
            contact_points: default_contact_points(),
            client_timeout_ms: default_client_timeout_ms(),
            agreement_poll_ms: default_agreement_poll_ms(),
            meta_keyspace: default_meta_keyspace(),
            debug: false,
        }
    }
}

impl MigrateConfig {
    /// Get the per-statement client timeout as a Duration.
    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }

    /// Get the schema-agreement poll interval as a Duration.
    pub fn agreement_poll(&self) -> Duration {
        Duration::from_millis(self.agreement_poll_ms)
    }

    /// Split the contact-point list.
    pub fn contact_points(&self) -> Vec<&str> {
        self.contact_points.split_whitespace().collect()
    }

    /// Validate configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.contact_points().is_empty() {
            return Err("contact_points must name at least one host".to_string());
        }
        if self.agreement_poll_ms == 0 {
            return Err("agreement_poll_ms cannot be 0".to_string());
        }
        if self.meta_keyspace.is_empty()
            || !self
                .meta_keyspace
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(format!(
                "meta_keyspace '{}' is not a bare identifier",
                self.meta_keyspace
            ));
        }
        Ok(())
    }

    /// Create a test configuration rooted at the given directory.
    ///
    /// **For testing only.** Uses a fast agreement poll so barrier tests do
    /// not sleep for real intervals.
    pub fn for_testing(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            agreement_poll_ms: 5,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = MigrateConfig::default();
        assert_eq!(config.root, PathBuf::from("/schema"));
        assert_eq!(config.init_filename, "cqlmigrate.cql");
        assert_eq!(config.bootstrap_filename, "bootstrap.cql");
        assert_eq!(config.contact_points, "localhost");
        assert_eq!(config.client_timeout(), Duration::from_secs(30));
        assert_eq!(config.agreement_poll(), Duration::from_secs(1));
        assert!(!config.debug);
    }

    #[test]
    fn contact_points_split_on_whitespace() {
        let config = MigrateConfig {
            contact_points: "node-a node-b  node-c".to_string(),
            ..MigrateConfig::default()
        };
        assert_eq!(config.contact_points(), vec!["node-a", "node-b", "node-c"]);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let config = MigrateConfig {
            contact_points: "   ".to_string(),
            ..MigrateConfig::default()
        };
        assert!(config.validate().is_err());

        let config = MigrateConfig {
            agreement_poll_ms: 0,
            ..MigrateConfig::default()
        };
        assert!(config.validate().is_err());

        let config = MigrateConfig {
            meta_keyspace: "bad-name".to_string(),
            ..MigrateConfig::default()
        };
        assert!(config.validate().is_err());

        assert!(MigrateConfig::default().validate().is_ok());
    }

    #[test]
    fn deserialize_fills_defaults() {
        let config: MigrateConfig = serde_json::from_str(r#"{"debug": true}"#).unwrap();
        assert!(config.debug);
        assert_eq!(config.meta_keyspace, "cqldrift");
    }
}
