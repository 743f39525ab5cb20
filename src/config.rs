use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

/// Name of the settings file expected inside the archive directory.
pub const SETTINGS_FILE: &str = ".soundcloud";

/// Settings loaded from the archive directory's `.soundcloud` file.
///
/// File format: TOML
///
/// ```toml
/// [main]
/// permalink = "some-artist"
/// client_id = "abcdef123456"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub main: Main,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Main {
    /// Profile handle of the user whose uploads get archived.
    pub permalink: String,
    /// API key passed along with every listing and download request.
    pub client_id: String,
}

impl Settings {
    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        let path = dir.join(SETTINGS_FILE);
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("settings file not found: {}", path.display()))?;
        let settings = toml::from_str(&raw)
            .with_context(|| format!("malformed settings file: {}", path.display()))?;
        Ok(settings)
    }
}
