use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::MedlinkConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "medlink.toml",
    "medlink.yaml",
    "medlink.yml",
    "medlink.json",
];

/// Load config from the given path (any supported format), then apply
/// environment overrides.
pub fn load_config(path: &Path) -> anyhow::Result<MedlinkConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    let mut config = parse_config(&raw, path)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./medlink.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/medlink/medlink.{toml,yaml,yml,json}` (user-global)
///
/// Falls back to defaults (plus env overrides) when nothing is found or the
/// file cannot be parsed.
pub fn discover_and_load() -> MedlinkConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    let mut config = MedlinkConfig::default();
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config
}

/// `PORT` wins over `server.port` when it holds a valid port number.
pub fn apply_env_overrides(config: &mut MedlinkConfig, lookup: impl Fn(&str) -> Option<String>) {
    let Some(raw) = lookup("PORT") else {
        return;
    };
    match raw.trim().parse::<u16>() {
        Ok(port) => config.server.port = port,
        Err(_) => warn!(value = %raw, "ignoring invalid PORT"),
    }
}

fn find_config_file() -> Option<PathBuf> {
    // Project-local
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    // User-global: ~/.config/medlink/
    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns `~/.config/medlink/` on all platforms.
pub fn config_dir() -> Option<PathBuf> {
    home_dir().map(|h| h.join(".config").join("medlink"))
}

fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}

/// Returns the path of an existing config file, or the default TOML path.
pub fn find_or_default_config_path() -> PathBuf {
    if let Some(path) = find_config_file() {
        return path;
    }
    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("medlink.toml")
}

/// Write `config` as TOML to `path`, creating parent directories.
///
/// Refuses to overwrite an existing file.
pub fn write_config(config: &MedlinkConfig, path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, render_toml(config)?)?;
    debug!(path = %path.display(), "wrote config file");
    Ok(())
}

pub fn render_toml(config: &MedlinkConfig) -> anyhow::Result<String> {
    toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("serialize config: {e}"))
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<MedlinkConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
