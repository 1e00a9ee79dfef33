//! List, delete, import and activate command handlers

use anyhow::{Context, Result};
use modeldepot::ModelDepot;
use std::path::Path;

use crate::utils::format_bytes;

pub async fn run_list(depot: &ModelDepot) -> Result<()> {
    let models = depot.scan_models().await?;

    if models.is_empty() {
        println!("No models downloaded. Use 'modeldepot catalog' to browse available models.");
        return Ok(());
    }

    println!("Models in {}:\n", depot.store().models_dir().display());
    for model in models {
        let active = if model.is_active { "\x1b[32m*\x1b[0m" } else { " " };
        let origin = if model.is_from_catalog { "catalog" } else { "imported" };
        println!(
            "{} {:<40} {:>10}  {:<8}  {}",
            active,
            model.id,
            format_bytes(model.size_bytes),
            origin,
            model.date_added.format("%Y-%m-%d %H:%M"),
        );
    }

    Ok(())
}

pub async fn run_delete(depot: &ModelDepot, model_id: &str) -> Result<()> {
    if depot.delete_model(model_id).await? {
        println!("Deleted model: {}", model_id);
    } else {
        println!("No downloaded model named '{}'.", model_id);
    }
    Ok(())
}

pub async fn run_import(depot: &ModelDepot, path: &Path, name: Option<&str>) -> Result<()> {
    let name = match name {
        Some(name) => name.to_string(),
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("Path has no file name")?,
    };

    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;

    println!("Importing {}...", path.display());
    let model = depot.store().import_external(file, &name).await?;
    println!(
        "\x1b[32m✓\x1b[0m Imported as {} ({})",
        model.id,
        format_bytes(model.size_bytes)
    );

    Ok(())
}

pub async fn run_activate(depot: &ModelDepot, model_id: &str) -> Result<()> {
    let model = depot.set_active(model_id).await?;
    println!("\x1b[32m✓\x1b[0m Active model: {}", model.display_name);
    println!("  {}", model.file_path.display());
    Ok(())
}
