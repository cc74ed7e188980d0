//! Environment-backed configuration for `backfill-smoke`.

use std::{env, path::PathBuf};

use backfill_core::{BackfillConfig, ConfigError};

const DEFAULT_HOMESERVER: &str = "https://matrix.example.org";
const DEFAULT_DATA_DIR: &str = "./.backfill-smoke-store";

/// Credentials needed for the live part of the smoke run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveTarget {
    pub user: String,
    pub password: String,
    pub room_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeConfig {
    pub homeserver: String,
    pub data_dir: PathBuf,
    /// `None` unless user, password and room id are all set.
    pub live: Option<LiveTarget>,
    pub backfill: BackfillConfig,
}

impl SmokeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let homeserver = optional_trimmed_env("BACKFILL_HOMESERVER", &mut lookup)
            .unwrap_or_else(|| DEFAULT_HOMESERVER.to_owned());
        let data_dir = optional_trimmed_env("BACKFILL_DATA_DIR", &mut lookup)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        let user = optional_trimmed_env("BACKFILL_USER", &mut lookup);
        let password = optional_trimmed_env("BACKFILL_PASSWORD", &mut lookup);
        let room_id = optional_trimmed_env("BACKFILL_ROOM_ID", &mut lookup);
        let live = match (user, password, room_id) {
            (Some(user), Some(password), Some(room_id)) => Some(LiveTarget {
                user,
                password,
                room_id,
            }),
            _ => None,
        };

        let backfill = BackfillConfig::from_lookup(&mut lookup)?;

        Ok(Self {
            homeserver,
            data_dir,
            live,
            backfill,
        })
    }

    pub fn cursor_file(&self) -> PathBuf {
        self.data_dir.join("cursors.json")
    }

    pub fn matrix_store_dir(&self) -> PathBuf {
        self.data_dir.join("matrix")
    }
}

fn optional_trimmed_env<F>(key: &str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from_pairs(pairs: &[(&str, &str)]) -> Result<SmokeConfig, ConfigError> {
        let map = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<HashMap<_, _>>();
        SmokeConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn uses_defaults_without_env() {
        let cfg = config_from_pairs(&[]).expect("config should parse");
        assert_eq!(cfg.homeserver, DEFAULT_HOMESERVER);
        assert_eq!(cfg.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
        assert_eq!(cfg.live, None);
        assert_eq!(cfg.backfill, BackfillConfig::default());
    }

    #[test]
    fn live_target_requires_all_three_values() {
        let partial = config_from_pairs(&[
            ("BACKFILL_USER", "@alice:example.org"),
            ("BACKFILL_PASSWORD", "hunter2"),
        ])
        .expect("config should parse");
        assert_eq!(partial.live, None);

        let full = config_from_pairs(&[
            ("BACKFILL_USER", " @alice:example.org "),
            ("BACKFILL_PASSWORD", "hunter2"),
            ("BACKFILL_ROOM_ID", "!room:example.org"),
        ])
        .expect("config should parse");
        assert_eq!(
            full.live,
            Some(LiveTarget {
                user: "@alice:example.org".to_owned(),
                password: "hunter2".to_owned(),
                room_id: "!room:example.org".to_owned(),
            })
        );
    }

    #[test]
    fn derives_store_paths_from_data_dir() {
        let cfg = config_from_pairs(&[("BACKFILL_DATA_DIR", "/tmp/backfill")])
            .expect("config should parse");
        assert_eq!(cfg.cursor_file(), PathBuf::from("/tmp/backfill/cursors.json"));
        assert_eq!(cfg.matrix_store_dir(), PathBuf::from("/tmp/backfill/matrix"));
    }

    #[test]
    fn forwards_coordinator_tuning_errors() {
        let err = config_from_pairs(&[("BACKFILL_COOLDOWN_MS", "soon")])
            .expect_err("invalid cooldown should fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "BACKFILL_COOLDOWN_MS",
                ..
            }
        ));
    }
}
