use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Channel name the background server binds when none is configured.
pub const DEFAULT_CHANNEL: &str = "satchel-background";

const DEFAULT_BADGE_COLOR: &str = "#2563eb";

#[derive(Debug, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_channel")]
    pub channel: String,
    /// Where queue snapshots are persisted. Absent means in-memory
    /// only, which loses pending requests across restarts.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_badge_color")]
    pub badge_color: String,
}

fn default_channel() -> String {
    DEFAULT_CHANNEL.to_string()
}

fn default_badge_color() -> String {
    DEFAULT_BADGE_COLOR.to_string()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            data_dir: None,
            badge_color: default_badge_color(),
        }
    }
}

impl DaemonConfig {
    pub fn from_toml(input: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(input)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
    }
}
