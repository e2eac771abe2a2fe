use crate::throttle::{ThrottleOptions, TrailingArgs};
use crate::util::atomic_write;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_WAIT_MS: u64 = 500;

/// On-disk form of [`ThrottleOptions`]. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleFile {
    pub wait_ms: u64,
    pub leading: bool,
    pub trailing: bool,
    pub trailing_args: TrailingArgs,
}

impl Default for ThrottleFile {
    fn default() -> Self {
        Self {
            wait_ms: DEFAULT_WAIT_MS,
            leading: true,
            trailing: true,
            trailing_args: TrailingArgs::Latest,
        }
    }
}

impl ThrottleFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).context("read throttle config")?;
        toml::from_str::<ThrottleFile>(&raw).context("parse throttle config")
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let data = toml::to_string_pretty(self)?;
        atomic_write(path, data.as_bytes()).context("write throttle config")
    }

    pub fn options(&self) -> ThrottleOptions {
        ThrottleOptions::new(Duration::from_millis(self.wait_ms))
            .leading(self.leading)
            .trailing(self.trailing)
            .trailing_args(self.trailing_args)
    }
}

impl Default for ThrottleOptions {
    fn default() -> Self {
        ThrottleFile::default().options()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let file = ThrottleFile::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(file, ThrottleFile::default());
        assert_eq!(ThrottleOptions::default().wait, Duration::from_millis(500));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("throttle.toml");
        std::fs::write(&path, "wait_ms = 250\ntrailing_args = \"first\"\n").unwrap();
        let opts = ThrottleFile::load(&path).unwrap().options();
        assert_eq!(opts.wait, Duration::from_millis(250));
        assert!(opts.leading);
        assert!(opts.trailing);
        assert_eq!(opts.trailing_args, TrailingArgs::First);
    }

    #[test]
    fn save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("throttle.toml");
        let file = ThrottleFile {
            wait_ms: 80,
            leading: false,
            ..Default::default()
        };
        file.save(&path).unwrap();
        assert_eq!(ThrottleFile::load(&path).unwrap(), file);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("throttle.toml");
        std::fs::write(&path, "wait_ms = \"soon\"\n").unwrap();
        let err = ThrottleFile::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("parse throttle config"));
    }
}
