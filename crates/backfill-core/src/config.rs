//! Environment-backed tuning for the backfill coordinator.

use std::{env, time::Duration};

use thiserror::Error;

use crate::timeline::bounded_paginate_limit;

const DEFAULT_MAX_CONCURRENCY: usize = 4;
const DEFAULT_COOLDOWN_MS: u64 = 1_000;
const DEFAULT_LIMIT: u16 = 15;
const DEFAULT_LIMIT_CAP: u16 = 100;
const DEFAULT_EVENT_BUFFER: usize = 256;

/// Coordinator tuning values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillConfig {
    /// Maximum page fetches running at once across all rooms.
    pub max_concurrency: usize,
    /// Delay between the end of one fetch and the next fetch for the same room.
    pub cooldown_ms: u64,
    /// Page size used by `enqueue_default`.
    pub default_limit: u16,
    /// Upper bound applied to every requested page size.
    pub limit_cap: u16,
    /// Capacity of the event broadcast channel.
    pub event_buffer: usize,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            default_limit: DEFAULT_LIMIT,
            limit_cap: DEFAULT_LIMIT_CAP,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl BackfillConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Parse configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let max_concurrency = parse_with_default(
            "BACKFILL_MAX_CONCURRENCY",
            DEFAULT_MAX_CONCURRENCY,
            &mut lookup,
        )?;
        let cooldown_ms =
            parse_with_default("BACKFILL_COOLDOWN_MS", DEFAULT_COOLDOWN_MS, &mut lookup)?;
        let default_limit =
            parse_with_default("BACKFILL_DEFAULT_LIMIT", DEFAULT_LIMIT, &mut lookup)?;
        let limit_cap = parse_with_default("BACKFILL_LIMIT_CAP", DEFAULT_LIMIT_CAP, &mut lookup)?;
        let event_buffer =
            parse_with_default("BACKFILL_EVENT_BUFFER", DEFAULT_EVENT_BUFFER, &mut lookup)?;

        if max_concurrency == 0 {
            return Err(at_least_one("BACKFILL_MAX_CONCURRENCY"));
        }
        if default_limit == 0 {
            return Err(at_least_one("BACKFILL_DEFAULT_LIMIT"));
        }
        if limit_cap == 0 {
            return Err(at_least_one("BACKFILL_LIMIT_CAP"));
        }
        if event_buffer == 0 {
            return Err(at_least_one("BACKFILL_EVENT_BUFFER"));
        }

        Ok(Self {
            max_concurrency,
            cooldown_ms,
            default_limit,
            limit_cap,
            event_buffer,
        })
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown_ms = u64::try_from(cooldown.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_default_limit(mut self, limit: u16) -> Self {
        self.default_limit = limit.max(1);
        self
    }

    pub fn with_limit_cap(mut self, cap: u16) -> Self {
        self.limit_cap = cap.max(1);
        self
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// Clamp a requested page size into `1..=limit_cap` (never above 100).
    pub fn clamp_limit(&self, requested: u16) -> u16 {
        bounded_paginate_limit(requested, self.limit_cap)
    }
}

/// Errors produced while parsing backfill configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable could not be parsed or was out of range.
    #[error("invalid {key}='{value}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

fn parse_with_default<T, F>(
    key: &'static str,
    default: T,
    lookup: &mut F,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key).filter(|value| !value.trim().is_empty()) else {
        return Ok(default);
    };
    value
        .trim()
        .parse::<T>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            reason: err.to_string(),
            value,
        })
}

fn at_least_one(key: &'static str) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: "0".to_owned(),
        reason: "must be at least 1".to_owned(),
    }
}
