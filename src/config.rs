//! Settings loaded from an optional TOML file.

use std::path::Path;
use std::time::Duration;

use chrono_tz::Tz;
use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// IANA zone used for calendar-day comparisons and timestamps
    pub timezone: String,
    pub lock_timeout_secs: u64,
    /// Roster / form submission tables, highest priority first
    pub roster_tables: Vec<String>,
    pub attendance_table: String,
    pub mentors_table: String,
    pub default_claimant: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timezone: "America/Chicago".to_string(),
            lock_timeout_secs: 30,
            roster_tables: vec!["2026".to_string(), "2025".to_string()],
            attendance_table: "attendance".to_string(),
            mentors_table: "mentors".to_string(),
            default_claimant: "unknown".to_string(),
        }
    }
}

impl Settings {
    /// Read settings from `path`, or fall back to defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|err| {
                    Error::Config(format!("cannot read {}: {err}", path.display()))
                })?;
                Self::from_toml(&raw)?
            }
            None => Self::default(),
        };
        settings.zone()?;
        Ok(settings)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|err| Error::Config(err.to_string()))
    }

    pub fn zone(&self) -> Result<Tz> {
        self.timezone
            .trim()
            .parse::<Tz>()
            .map_err(|_| Error::Config(format!("unknown timezone '{}'", self.timezone)))
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs.max(1))
    }
}
