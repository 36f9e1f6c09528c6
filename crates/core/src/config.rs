//! `config.conf` key=value textual format (spec §6).
//!
//! Loading preserves every key the file contains, including ones this
//! version of the library does not know about, so that a newer writer's
//! extra keys survive a round trip through an older reader. Writing uses
//! the write-temp, fsync, rename pattern used throughout the durability
//! layer for crash-safe replacement (spec §5 "Configuration writes use
//! rename-swap").

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

/// An in-memory view of a `config.conf` file: an ordered map of string
/// key/value pairs. `#`-prefixed lines are comments and are dropped on
/// load (matching the original config reader); everything else must be a
/// `key=value` line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    entries: BTreeMap<String, String>,
}

impl Config {
    pub fn new() -> Self {
        Config::default()
    }

    /// Loads a config file from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::io("read config", path, e))?;
        Ok(Self::parse(&text))
    }

    /// Parses config text directly (used by tests and by callers that
    /// already have the bytes in hand).
    pub fn parse(text: &str) -> Self {
        let mut entries = BTreeMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                entries.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        Config { entries }
    }

    pub fn get(&self, key: &str) -> Result<&str> {
        self.entries
            .get(key)
            .map(|s| s.as_str())
            .ok_or_else(|| Error::Codec(format!("missing config key '{key}'")))
    }

    pub fn get_u64(&self, key: &str) -> Result<u64> {
        self.get(key)?
            .parse()
            .map_err(|_| Error::Codec(format!("config key '{key}' is not a u64")))
    }

    pub fn get_u32(&self, key: &str) -> Result<u32> {
        self.get(key)?
            .parse()
            .map_err(|_| Error::Codec(format!("config key '{key}' is not a u32")))
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Serializes as `config.conf` text: one `key=value` line per entry,
    /// keys sorted for a deterministic byte-for-byte output.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (k, v) in &self.entries {
            out.push_str(k);
            out.push('=');
            out.push_str(v);
            out.push('\n');
        }
        out
    }

    /// Writes the config via a rename-swap: write `path.new`, fsync,
    /// rename over `path`. A crash mid-write leaves the old file intact.
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        let tmp_path = path.with_extension("conf.new");
        {
            let mut f =
                fs::File::create(&tmp_path).map_err(|e| Error::io("create config", &tmp_path, e))?;
            f.write_all(self.render().as_bytes())
                .map_err(|e| Error::io("write config", &tmp_path, e))?;
            f.sync_all().map_err(|e| Error::io("fsync config", &tmp_path, e))?;
        }
        fs::rename(&tmp_path, path).map_err(|e| Error::io("rename config", path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn unknown_keys_survive_a_round_trip() {
        let mut cfg = Config::new();
        cfg.set("major", "0");
        cfg.set("a_future_key", "future_value");
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.conf");
        cfg.write_atomic(&path).unwrap();
        let reloaded = Config::load(&path).unwrap();
        assert_eq!(reloaded.get("a_future_key").unwrap(), "future_value");
    }

    #[test]
    fn comment_lines_are_ignored() {
        let cfg = Config::parse("# a comment\nmajor=0\n# another\nminor=1\n");
        assert_eq!(cfg.get("major").unwrap(), "0");
        assert_eq!(cfg.get("minor").unwrap(), "1");
        assert_eq!(cfg.entries().count(), 2);
    }
}
