//! Config inspection and bootstrap

use std::path::Path;

use anyhow::{Context, Result, bail};
use gateway_core::{Config, config::CONFIG_ENV};

/// Print the effective configuration and where it came from
pub fn cmd_config_show(explicit: Option<&Path>, json: bool) -> Result<()> {
  let config = Config::load(explicit).context("Failed to load config")?;

  if json {
    println!("{}", serde_json::to_string_pretty(&config)?);
    return Ok(());
  }

  let source = if let Some(path) = explicit {
    format!("{} (--config)", path.display())
  } else if let Ok(path) = std::env::var(CONFIG_ENV) {
    format!("{} (${})", path, CONFIG_ENV)
  } else {
    match Config::user_config_path() {
      Some(path) if path.exists() => path.display().to_string(),
      _ => "built-in defaults".to_string(),
    }
  };

  println!("# Using: {}\n", source);
  println!("{}", toml::to_string_pretty(&config).context("Failed to serialize config")?);
  Ok(())
}

/// Write the default template to the user config path
pub fn cmd_config_init(force: bool) -> Result<()> {
  let Some(path) = Config::user_config_path() else {
    bail!("Could not determine a config directory");
  };

  if path.exists() && !force {
    println!("Config already exists: {}", path.display());
    println!("Use --force to overwrite, or edit the file directly.");
    return Ok(());
  }

  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
  }
  std::fs::write(&path, Config::generate_template()).with_context(|| format!("Failed to write {}", path.display()))?;

  println!("Created config: {}", path.display());
  Ok(())
}
