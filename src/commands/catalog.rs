//! Catalog command handler

use anyhow::Result;
use modeldepot::{CatalogOrigin, ModelDepot};
use std::collections::HashSet;

pub async fn run_catalog(depot: &ModelDepot, tag: Option<&str>, refresh: bool) -> Result<()> {
    let snapshot = if refresh {
        depot.refresh_catalog().await
    } else {
        depot.catalog().await
    };

    let downloaded: HashSet<String> = depot
        .scan_models()
        .await?
        .into_iter()
        .filter_map(|m| m.filename().map(str::to_string))
        .collect();

    let entries = match tag {
        Some(tag) => snapshot.with_tag(tag),
        None => snapshot.entries.iter().collect(),
    };

    let origin = match &snapshot.origin {
        CatalogOrigin::Cache => "cache".to_string(),
        CatalogOrigin::Remote(url) => url.clone(),
        CatalogOrigin::StaleCache => "\x1b[33mexpired cache (offline)\x1b[0m".to_string(),
        CatalogOrigin::Embedded => "\x1b[33mbuilt-in list (offline)\x1b[0m".to_string(),
    };
    println!("Model catalog v{} ({})\n", snapshot.version, origin);

    if entries.is_empty() {
        match tag {
            Some(tag) => println!("No models tagged '{}'.", tag),
            None => println!("The catalog is empty."),
        }
        return Ok(());
    }

    for entry in entries {
        let marker = if downloaded.contains(&entry.filename) {
            "\x1b[32m✓\x1b[0m"
        } else {
            " "
        };
        println!(
            "{} \x1b[1m{:<24}\x1b[0m {:<28} {:>8}  {:>5} {:<7} {} GB RAM",
            marker,
            entry.id,
            entry.name,
            entry.size_display,
            entry.parameters,
            entry.quantization,
            entry.recommended_ram_gb,
        );
        if !entry.description.is_empty() {
            println!("    \x1b[90m{}\x1b[0m", entry.description);
        }
    }

    println!("\nDownload with: modeldepot download <id>");
    Ok(())
}
