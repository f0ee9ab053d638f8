use std::path::PathBuf;
use std::fs;
use directories::ProjectDirs;
use crate::common::error::{KioskError, Result};
use crate::common::paths;

#[derive(Debug, Clone)]
pub struct DevMode {
    enabled: bool,
    base_dir: PathBuf,
}

impl DevMode {
    pub fn new(enabled: bool) -> Result<Self> {
        Self::with_base_dir(enabled, PathBuf::from("./dev_data"))
    }

    pub fn with_base_dir(enabled: bool, base_dir: PathBuf) -> Result<Self> {
        if enabled {
            fs::create_dir_all(base_dir.join("identities"))?;
            fs::create_dir_all(base_dir.join("debug"))?;
            fs::create_dir_all(base_dir.join("config"))?;

            tracing::info!("Development mode enabled - data will be saved to: {}", base_dir.display());
        }

        Ok(Self { enabled, base_dir })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Directory holding enrolled identities and their face crops.
    pub fn data_dir(&self) -> Result<PathBuf> {
        if self.enabled {
            return Ok(self.base_dir.join("identities"));
        }

        let system_dir = paths::system_data_dir();
        if system_dir.exists() {
            return Ok(system_dir);
        }

        let dirs = ProjectDirs::from("com", "facekiosk", "FaceKiosk")
            .ok_or_else(|| KioskError::Storage("Failed to get project dirs".into()))?;
        Ok(dirs.data_dir().join("identities"))
    }

    pub fn config_file(&self) -> PathBuf {
        if self.enabled {
            let local = self.base_dir.join("config").join("kiosk.toml");
            if local.exists() {
                return local;
            }
            PathBuf::from("configs/kiosk.toml")
        } else {
            paths::system_config_file()
        }
    }

    pub fn debug_dir(&self) -> PathBuf {
        if self.enabled {
            self.base_dir.join("debug")
        } else {
            PathBuf::from(".")
        }
    }

    pub fn get_debug_path(&self, prefix: &str) -> PathBuf {
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        self.debug_dir().join(format!("{}_{}.png", prefix, timestamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dev_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let dev = DevMode::with_base_dir(true, tmp.path().to_path_buf()).unwrap();

        assert!(dev.is_enabled());
        assert_eq!(dev.data_dir().unwrap(), tmp.path().join("identities"));
        assert!(tmp.path().join("identities").is_dir());
        assert!(dev.get_debug_path("frame").starts_with(tmp.path().join("debug")));
    }

    #[test]
    fn test_production_config_path() {
        let dev = DevMode::new(false).unwrap();
        assert_eq!(dev.config_file(), paths::system_config_file());
    }
}
