//! Config command handler

use anyhow::Result;
use modeldepot::Config;

pub fn run_config(init: bool) -> Result<()> {
    let path = Config::path()?;

    if init {
        if Config::exists() {
            println!("Config already exists at {}", path.display());
        } else {
            Config::default().save()?;
            println!("\x1b[32m✓\x1b[0m Wrote default config to {}", path.display());
        }
        return Ok(());
    }

    match Config::load()? {
        Some(config) => {
            println!("\x1b[90m# {}\x1b[0m\n", path.display());
            print!("{}", toml::to_string_pretty(&config)?);
        }
        None => {
            println!("No config file at {} (using defaults).", path.display());
            println!("Create one with: modeldepot config --init");
        }
    }
    Ok(())
}
