use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tracing::debug;

/// Preferences kept between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// The directory captures and exports were last placed in.
    pub project_directory: Option<PathBuf>,
}

impl Settings {
    /// Load settings from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(message = "no settings file, using defaults", path = %path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(Error::ReadFile(e, path.to_path_buf())),
        };
        serde_json::from_str(&content).map_err(|e| Error::ReadSettings(e, path.to_path_buf()))
    }

    pub fn save(&self, path: &Path) -> Result<(), Error> {
        let json = serde_json::to_string_pretty(self).map_err(Error::SerializeSettings)?;
        fs::write(path, json).map_err(|e| Error::WriteFile(e, path.to_path_buf()))
    }

    /// The project directory, or `fallback` if none was stored yet.
    pub fn project_directory_or(&self, fallback: &Path) -> PathBuf {
        self.project_directory
            .clone()
            .unwrap_or_else(|| fallback.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::Settings;
    use std::path::{Path, PathBuf};

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("settings.json")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(
            settings.project_directory_or(Path::new("/data")),
            PathBuf::from("/data")
        );
    }

    #[test]
    fn saved_settings_load_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let settings = Settings {
            project_directory: Some(PathBuf::from("/projects/walk")),
        };
        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path).unwrap(), settings);
    }

    #[test]
    fn malformed_settings_fail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(Settings::load(&path).is_err());
    }
}
