use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::env;

use crate::models::DEFAULT_DURATION_MINUTES;

pub const DEFAULT_MAX_DURATION_MINUTES: u32 = 8 * 60;
pub const DEFAULT_EVENTS_CHANNEL: &str = "appointments";
pub const DEFAULT_LOG_FILTER: &str = "wellslot=info";

/// Knobs the scheduling engine itself reads.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SchedulerConfig {
    pub default_duration_minutes: u32,
    pub max_duration_minutes: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            default_duration_minutes: DEFAULT_DURATION_MINUTES,
            max_duration_minutes: DEFAULT_MAX_DURATION_MINUTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    /// Channel the outbox worker publishes change events on.
    pub events_channel: String,
    pub log_filter: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key lookup; `from_env` uses the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let default_duration_minutes = match lookup("WELLSLOT_DEFAULT_DURATION_MINUTES") {
            Some(val) => val
                .parse::<u32>()
                .context("Failed to parse WELLSLOT_DEFAULT_DURATION_MINUTES")?,
            None => DEFAULT_DURATION_MINUTES,
        };

        let max_duration_minutes = match lookup("WELLSLOT_MAX_DURATION_MINUTES") {
            Some(val) => val
                .parse::<u32>()
                .context("Failed to parse WELLSLOT_MAX_DURATION_MINUTES")?,
            None => DEFAULT_MAX_DURATION_MINUTES,
        };

        if default_duration_minutes == 0 {
            bail!("WELLSLOT_DEFAULT_DURATION_MINUTES must be positive");
        }
        if default_duration_minutes > max_duration_minutes {
            bail!(
                "Default duration ({} min) exceeds the maximum duration ({} min)",
                default_duration_minutes,
                max_duration_minutes
            );
        }

        let events_channel = lookup("WELLSLOT_EVENTS_CHANNEL")
            .filter(|channel| !channel.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_EVENTS_CHANNEL.to_string());

        let log_filter = lookup("WELLSLOT_LOG_FILTER")
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        Ok(Config {
            scheduler: SchedulerConfig {
                default_duration_minutes,
                max_duration_minutes,
            },
            events_channel,
            log_filter,
        })
    }
}
