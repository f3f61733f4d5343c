use std::path::PathBuf;

/// CLI configuration, loaded from environment variables.
pub struct Config {
    /// Root directory for everything rollcall persists.
    pub data_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory holding the persisted matcher pair.
    pub model_dir: PathBuf,
    /// OpenCV haar cascade XML used for face detection.
    pub cascade_path: PathBuf,
    /// Directory reference photos are copied into on enrollment.
    pub photo_dir: PathBuf,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("ROLLCALL_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());

        Self {
            db_path: env_path("ROLLCALL_DB_PATH", data_dir.join("rollcall.db")),
            model_dir: env_path("ROLLCALL_MODEL_DIR", data_dir.join("model")),
            cascade_path: env_path(
                "ROLLCALL_CASCADE",
                data_dir.join("haarcascade_frontalface_default.xml"),
            ),
            photo_dir: env_path("ROLLCALL_PHOTO_DIR", data_dir.join("photos")),
            data_dir,
        }
    }
}

fn default_data_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg).join("rollcall");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local/share/rollcall");
    }
    PathBuf::from("/var/lib/rollcall")
}

fn env_path(key: &str, default: PathBuf) -> PathBuf {
    std::env::var(key).map(PathBuf::from).unwrap_or(default)
}
