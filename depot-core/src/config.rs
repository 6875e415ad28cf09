//! YAML configuration: replica descriptors and sync descriptors.
//!
//! A config source is either a single YAML file or a directory, in which
//! case every `.yml`/`.yaml` file directly under it is loaded and merged.
//! Merging rejects duplicated names rather than silently overriding.
//!
//! ```yaml
//! replicas:
//!   eu1:
//!     host: minio1:9000
//!     access_key: ${DEPOT_ACCESS_KEY}
//!     secret_key: ${DEPOT_SECRET_KEY}
//!     bucket: artifacts
//! syncs:
//!   alerting_rules:
//!     replicas: [eu1]
//!     archive: alerting_rules.tar.gz
//!     path: /etc/prometheus/rules
//!     commands:
//!       - kill -HUP $(pidof prometheus)
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::de::Deserializer;
use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};

/// Default shell used to run post-install commands.
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Default per-sync timeout when the config does not set one.
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// An access/secret credential loaded from YAML.
///
/// `${VAR}` references are expanded from the environment at deserialization
/// time, so config files never need to carry secrets verbatim. The `Debug`
/// form is redacted.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Credential(pub String);

impl Credential {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

impl From<&str> for Credential {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl<'de> Deserialize<'de> for Credential {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Credential(expand_env(&raw)))
    }
}

/// Replace every `${VAR}` occurrence with the value of the environment
/// variable `VAR`; unset variables expand to the empty string.
fn expand_env(input: &str) -> String {
    let re = Regex::new(r"\$\{(\w+)\}").expect("valid env reference pattern");
    re.replace_all(input, |caps: &regex::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .into_owned()
}

// ---------------------------------------------------------------------------
// Replica and sync descriptors
// ---------------------------------------------------------------------------

/// One object-storage replica: an S3-compatible endpoint holding a redundant
/// copy of the same logical content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaConfig {
    /// Endpoint host, with or without a scheme (`minio1:9000` implies http).
    pub host: String,
    pub access_key: Credential,
    pub secret_key: Credential,
    pub bucket: String,
    /// Overrides the HTTP Host header on every request, for replicas
    /// reached through an address that differs from their virtual host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_host_header: Option<String>,
}

/// One source→target synchronization task.
///
/// Exactly one of `archive` (a single gzipped tarball key) or `tree` (a key
/// prefix mirrored as a directory) must be set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Names of the replicas holding this content, in preference order.
    pub replicas: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree: Option<String>,
    /// Local directory the content is installed into.
    pub path: PathBuf,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Wall-clock budget for one cycle of this sync, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout: u64,
    /// When non-empty, only target entries whose name starts with this
    /// byte prefix are removed before install.
    #[serde(default)]
    pub replace_prefix: String,
}

impl SyncConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

fn default_shell() -> String {
    DEFAULT_SHELL.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

// ---------------------------------------------------------------------------
// Global config
// ---------------------------------------------------------------------------

/// Root of the depot YAML configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub replicas: BTreeMap<String, ReplicaConfig>,
    #[serde(default)]
    pub syncs: BTreeMap<String, SyncConfig>,
}

impl GlobalConfig {
    /// Fold `other` into `self`, rejecting duplicated names.
    pub fn merge(&mut self, other: GlobalConfig) -> Result<(), ConfigError> {
        for name in other.replicas.keys() {
            if self.replicas.contains_key(name) {
                return Err(ConfigError::DuplicateReplica(name.clone()));
            }
        }
        for name in other.syncs.keys() {
            if self.syncs.contains_key(name) {
                return Err(ConfigError::DuplicateSync(name.clone()));
            }
        }
        self.replicas.extend(other.replicas);
        self.syncs.extend(other.syncs);
        Ok(())
    }

    /// Check structural invariants: every sync names exactly one source,
    /// has at least one replica, and only references defined replicas.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, sync) in &self.syncs {
            match (&sync.archive, &sync.tree) {
                (None, None) => return Err(ConfigError::MissingSource(name.clone())),
                (Some(_), Some(_)) => return Err(ConfigError::ConflictingSource(name.clone())),
                _ => {}
            }
            if sync.replicas.is_empty() {
                return Err(ConfigError::EmptyReplicas(name.clone()));
            }
            for replica in &sync.replicas {
                if !self.replicas.contains_key(replica) {
                    return Err(ConfigError::UnknownReplica {
                        sync: name.clone(),
                        replica: replica.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load configuration from `path`, which may be a single YAML file or a
/// directory of YAML files. The merged result is validated before return.
pub fn load(path: &Path) -> Result<GlobalConfig, ConfigError> {
    let meta = std::fs::metadata(path).map_err(|e| io_err(path, e))?;
    let config = if meta.is_dir() {
        load_dir(path)?
    } else {
        load_file(path)?
    };
    config.validate()?;
    Ok(config)
}

fn load_file(path: &Path) -> Result<GlobalConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Merge every `.yml`/`.yaml` file directly under `dir`, in lexical order
/// so the result does not depend on directory iteration order.
/// Subdirectories are not descended into.
fn load_dir(dir: &Path) -> Result<GlobalConfig, ConfigError> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| io_err(dir, e))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_yaml(p))
        .collect();
    files.sort();

    let mut merged = GlobalConfig::default();
    for file in files {
        let config = load_file(&file)?;
        merged.merge(config)?;
    }
    Ok(merged)
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yml") | Some("yaml")
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use tempfile::TempDir;

    const REPLICA_YAML: &str = r#"
replicas:
  eu1:
    host: minio1:9000
    access_key: aabb
    secret_key: bbaa
    bucket: test
"#;

    fn full_yaml(sync_name: &str, replica: &str) -> String {
        format!(
            r#"
replicas:
  {replica}:
    host: minio1:9000
    access_key: aabb
    secret_key: bbaa
    bucket: test
syncs:
  {sync_name}:
    replicas: [{replica}]
    archive: alerting_rules.tar.gz
    path: /etc/prometheus/rules
    commands:
      - kill -HUP $(pidof prometheus)
"#
        )
    }

    #[test]
    fn loads_single_file_with_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let file = dir.path().join("depot.yaml");
        fs::write(&file, full_yaml("rules", "eu1")).expect("write");

        let config = load(&file).expect("load");
        let sync = config.syncs.get("rules").expect("sync present");
        assert_eq!(sync.shell, DEFAULT_SHELL);
        assert_eq!(sync.timeout(), Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(sync.replace_prefix, "");
        assert_eq!(sync.archive.as_deref(), Some("alerting_rules.tar.gz"));
    }

    #[test]
    fn loads_and_merges_directory() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("a.yaml"), full_yaml("rules", "eu1")).expect("write a");
        fs::write(dir.path().join("b.yml"), full_yaml("dashboards", "eu2")).expect("write b");
        fs::write(dir.path().join("ignored.txt"), "not yaml").expect("write ignored");

        let config = load(dir.path()).expect("load");
        assert_eq!(config.replicas.len(), 2);
        assert_eq!(config.syncs.len(), 2);
    }

    #[test]
    fn duplicate_sync_name_across_files_is_rejected() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("a.yaml"), full_yaml("rules", "eu1")).expect("write a");
        fs::write(dir.path().join("b.yaml"), full_yaml("rules", "eu2")).expect("write b");

        let err = load(dir.path()).expect_err("duplicate must fail");
        assert!(matches!(err, ConfigError::DuplicateSync(name) if name == "rules"));
    }

    #[test]
    fn sync_without_source_is_rejected() {
        let yaml = format!(
            "{REPLICA_YAML}syncs:\n  rules:\n    replicas: [eu1]\n    path: /tmp/x\n"
        );
        let config: GlobalConfig = serde_yaml::from_str(&yaml).expect("parse");
        let err = config.validate().expect_err("missing source");
        assert!(matches!(err, ConfigError::MissingSource(name) if name == "rules"));
    }

    #[test]
    fn sync_with_both_sources_is_rejected() {
        let yaml = format!(
            "{REPLICA_YAML}syncs:\n  rules:\n    replicas: [eu1]\n    archive: a.tar.gz\n    tree: a/\n    path: /tmp/x\n"
        );
        let config: GlobalConfig = serde_yaml::from_str(&yaml).expect("parse");
        let err = config.validate().expect_err("conflicting source");
        assert!(matches!(err, ConfigError::ConflictingSource(name) if name == "rules"));
    }

    #[test]
    fn dangling_replica_reference_is_rejected() {
        let yaml = format!(
            "{REPLICA_YAML}syncs:\n  rules:\n    replicas: [nosuch]\n    archive: a.tar.gz\n    path: /tmp/x\n"
        );
        let config: GlobalConfig = serde_yaml::from_str(&yaml).expect("parse");
        let err = config.validate().expect_err("unknown replica");
        match err {
            ConfigError::UnknownReplica { sync, replica } => {
                assert_eq!(sync, "rules");
                assert_eq!(replica, "nosuch");
            }
            other => panic!("expected UnknownReplica, got {other:?}"),
        }
    }

    #[test]
    fn credential_expands_environment_variables() {
        std::env::set_var("DEPOT_TEST_ACCESS_KEY", "foo");
        let yaml = "host: h\naccess_key: ${DEPOT_TEST_ACCESS_KEY}\nsecret_key: literal\nbucket: b\n";
        let replica: ReplicaConfig = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(replica.access_key, Credential::from("foo"));
        assert_eq!(replica.secret_key, Credential::from("literal"));
    }

    #[test]
    fn unset_variable_expands_to_empty() {
        std::env::remove_var("DEPOT_TEST_UNSET");
        assert_eq!(expand_env("x${DEPOT_TEST_UNSET}y"), "xy");
    }

    #[test]
    fn credential_debug_is_redacted() {
        let c = Credential::from("supersecret");
        let printed = format!("{c:?}");
        assert!(!printed.contains("supersecret"));
    }

    #[test]
    fn empty_replica_list_is_rejected() {
        let yaml = format!(
            "{REPLICA_YAML}syncs:\n  rules:\n    replicas: []\n    archive: a.tar.gz\n    path: /tmp/x\n"
        );
        let config: GlobalConfig = serde_yaml::from_str(&yaml).expect("parse");
        let err = config.validate().expect_err("empty replicas");
        assert!(matches!(err, ConfigError::EmptyReplicas(name) if name == "rules"));
    }
}
