//! Short names for connection config files.

use crate::config::ConfigError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Optional file in the config directory extending the built-in table.
pub const CUSTOM_NICKNAMES_FILE: &str = "custom_nicknames.json";
/// Config file used when no name is given.
pub const DEFAULT_CONFIG_FILE: &str = "default_connection.json";

const BUILTIN_NICKNAMES: [(&str, &str); 6] = [
    ("fafb", "virtualflybrain_FAFB.json"),
    ("brain", "virtualflybrain_FAFB.json"),
    ("fanc", "virtualflybrain_FANC.json"),
    ("vnc", "virtualflybrain_FANC.json"),
    ("larva", "virtualflybrain_L1larva.json"),
    ("l1", "virtualflybrain_L1larva.json"),
];

/// Nickname to config filename, keys stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NicknameTable {
    entries: BTreeMap<String, String>,
}

impl Default for NicknameTable {
    fn default() -> Self {
        Self {
            entries: BUILTIN_NICKNAMES
                .iter()
                .map(|(name, file)| (name.to_string(), file.to_string()))
                .collect(),
        }
    }
}

impl NicknameTable {
    /// Built-in table plus `custom_nicknames.json` from `config_dir`, if any.
    pub fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let mut table = Self::default();
        let custom = config_dir.join(CUSTOM_NICKNAMES_FILE);
        if custom.exists() {
            let text = std::fs::read_to_string(&custom).map_err(|source| ConfigError::Io {
                path: custom.clone(),
                source,
            })?;
            let extra: BTreeMap<String, String> =
                serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                    path: custom.clone(),
                    source,
                })?;
            table.extend(extra);
        }
        Ok(table)
    }

    pub fn extend(&mut self, extra: BTreeMap<String, String>) {
        for (name, file) in extra {
            self.entries.insert(name.to_lowercase(), file);
        }
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Turns a nickname, path or bare filename into the config file path.
    ///
    /// Nicknames are expanded first; a name that is not an existing path is
    /// looked up inside `config_dir`.
    pub fn resolve(&self, name: &str, config_dir: &Path) -> PathBuf {
        let file = self.get(name).unwrap_or(name);
        let direct = PathBuf::from(file);
        if direct.exists() {
            direct
        } else {
            config_dir.join(file)
        }
    }
}
