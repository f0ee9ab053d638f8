use std::path::PathBuf;

// System locations used outside development mode

pub fn system_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/facekiosk/identities")
}

pub fn system_config_file() -> PathBuf {
    PathBuf::from("/etc/facekiosk/kiosk.toml")
}

pub fn system_models_dir() -> PathBuf {
    PathBuf::from("/usr/share/facekiosk/models")
}
