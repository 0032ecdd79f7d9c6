// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Group membership configuration: which group to join, as which rank, and
// how many members it has. The launcher passes these to every rank through
// the environment.

use crate::error::{Error, Result};

/// Environment variable naming the group.
pub const ENV_GROUP: &str = "RMALOCK_GROUP";
/// Environment variable holding this process's rank.
pub const ENV_RANK: &str = "RMALOCK_RANK";
/// Environment variable holding the group size.
pub const ENV_SIZE: &str = "RMALOCK_SIZE";

/// Identity of one member of a fixed-size group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupConfig {
    /// Group name; every shared resource of the group is derived from it.
    pub name: String,
    /// This member's rank, `0..size`.
    pub rank: usize,
    /// Number of members.
    pub size: usize,
}

impl GroupConfig {
    pub fn new(name: impl Into<String>, rank: usize, size: usize) -> Self {
        Self {
            name: name.into(),
            rank,
            size,
        }
    }

    /// Read `RMALOCK_GROUP`, `RMALOCK_RANK` and `RMALOCK_SIZE`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key).ok_or_else(|| Error::Config(format!("{key} is not set")))
        };
        let number = |key: &str| -> Result<usize> {
            let raw = required(key)?;
            raw.trim()
                .parse()
                .map_err(|_| Error::Config(format!("{key}={raw:?} is not a number")))
        };

        let config = Self {
            name: required(ENV_GROUP)?,
            rank: number(ENV_RANK)?,
            size: number(ENV_SIZE)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Environment assignments that reproduce this config in a child process.
    pub fn to_env(&self) -> [(&'static str, String); 3] {
        [
            (ENV_GROUP, self.name.clone()),
            (ENV_RANK, self.rank.to_string()),
            (ENV_SIZE, self.size.to_string()),
        ]
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Config("group name is empty".into()));
        }
        let valid_char = |c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.');
        if !self.name.chars().all(valid_char) {
            return Err(Error::Config(format!(
                "group name {:?} may only contain ASCII letters, digits, '_', '-' and '.'",
                self.name
            )));
        }
        if self.size == 0 {
            return Err(Error::Config("group size must be at least 1".into()));
        }
        if self.rank >= self.size {
            return Err(Error::RankOutOfRange {
                rank: self.rank,
                size: self.size,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn parses_complete_environment() {
        let cfg = GroupConfig::from_lookup(lookup(&[
            (ENV_GROUP, "jobs"),
            (ENV_RANK, "2"),
            (ENV_SIZE, " 4 "),
        ]))
        .expect("valid config");
        assert_eq!(cfg, GroupConfig::new("jobs", 2, 4));
    }

    #[test]
    fn missing_variable_is_reported() {
        let err = GroupConfig::from_lookup(lookup(&[(ENV_GROUP, "jobs"), (ENV_RANK, "0")]))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_SIZE));
    }

    #[test]
    fn rank_must_be_below_size() {
        let err = GroupConfig::new("g", 3, 3).validate().unwrap_err();
        assert!(matches!(err, Error::RankOutOfRange { rank: 3, size: 3 }));
    }

    #[test]
    fn rejects_bad_names_and_sizes() {
        assert!(GroupConfig::new("", 0, 1).validate().is_err());
        assert!(GroupConfig::new("a/b", 0, 1).validate().is_err());
        assert!(GroupConfig::new("ok", 0, 0).validate().is_err());
        assert!(GroupConfig::new("ok.name-1", 0, 1).validate().is_ok());
    }

    #[test]
    fn to_env_round_trips() {
        let cfg = GroupConfig::new("demo", 1, 2);
        let env = cfg.to_env();
        let back = GroupConfig::from_lookup(|key| {
            env.iter().find(|(k, _)| *k == key).map(|(_, v)| v.clone())
        })
        .expect("round trip");
        assert_eq!(back, cfg);
    }
}
