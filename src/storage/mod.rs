//! Storage Layer
//!
//! Resolves the per-user directories the application reads its settings from
//! and mirrors downloaded models into.

use anyhow::Result;
use std::path::PathBuf;

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("org", "ecolens", "EcoLens")
        .ok_or_else(|| anyhow::anyhow!("Could not determine project directories"))
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = project_dirs()?.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;

    Ok(config_dir)
}

/// Default location of `config.toml`
pub fn default_config_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("config.toml"))
}

/// Directory remote models are mirrored into
pub fn get_model_cache_dir() -> Result<PathBuf> {
    let cache_dir = project_dirs()?.cache_dir().join("models");
    std::fs::create_dir_all(&cache_dir)?;
    Ok(cache_dir)
}
