//! Centralized path management for anidb-queue
//!
//! Every command resolves the database, image and configuration locations
//! through these helpers so `run` and the one-shot commands agree.

use std::path::PathBuf;

/// The name of the application directory used across all platforms
const APP_DIR: &str = "anidb-queue";

/// The name of the downloaded image subdirectory
const IMAGES_SUBDIR: &str = "images";

/// The name of the database file
const DATABASE_FILE: &str = "queue.db";

/// The name of the configuration file
const CONFIG_FILE: &str = "config.toml";

/// Returns the base data directory for the application
///
/// On Unix-like systems this follows the XDG Base Directory layout
/// (`~/.local/share/anidb-queue`), on Windows it lives under `%APPDATA%`.
/// Falls back to `.anidb-queue` in the current directory.
pub fn get_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from(".anidb-queue"))
}

/// Returns the path of the SQLite database holding commands, records and session state
pub fn get_database_path() -> PathBuf {
    get_data_dir().join(DATABASE_FILE)
}

/// Returns the directory downloaded posters are stored in
pub fn get_images_dir() -> PathBuf {
    get_data_dir().join(IMAGES_SUBDIR)
}

/// Returns the configuration directory
///
/// `XDG_CONFIG_HOME` wins when set (outside Windows).
pub fn get_config_dir() -> PathBuf {
    #[cfg(not(target_os = "windows"))]
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg_config.is_empty() {
            return PathBuf::from(xdg_config).join(APP_DIR);
        }
    }

    dirs::config_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from(".anidb-queue"))
}

/// Returns the path to the configuration file
pub fn get_config_path() -> PathBuf {
    get_config_dir().join(CONFIG_FILE)
}
