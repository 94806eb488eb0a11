use std::path::{Path, PathBuf};

/// User config file: `~/.config/mykube/config.toml`. `None` when the platform
/// has no config directory.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("mykube").join("config.toml"))
}

/// Private key used when the config names none: `~/.ssh/id_ed25519`
pub fn default_private_key() -> PathBuf {
    home().join(".ssh").join("id_ed25519")
}

/// Expand a leading `~/` to the home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home().join(rest),
        None if path == "~" => home(),
        None => Path::new(path).to_path_buf(),
    }
}

fn home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/root"))
}
