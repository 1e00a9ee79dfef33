//! Storage and cleanup command handlers

use anyhow::Result;
use modeldepot::ModelDepot;

use crate::utils::format_bytes;

pub async fn run_storage(depot: &ModelDepot) -> Result<()> {
    let info = depot.storage_info().await?;

    println!("ModelDepot Storage Usage\n");
    println!("  Models directory   {}", info.models_dir.display());
    println!("  Models             {:>12}", info.model_count);
    println!("  Used by models     {:>12}", format_bytes(info.models_bytes));

    match (info.available_bytes, info.total_bytes) {
        (Some(available), Some(total)) => {
            println!("  Disk free          {:>12}", format_bytes(available));
            println!("  Disk size          {:>12}", format_bytes(total));
        }
        _ => println!("  \x1b[90mDisk space unavailable\x1b[0m"),
    }

    Ok(())
}

pub async fn run_cleanup(depot: &ModelDepot) -> Result<()> {
    let removed = depot.cleanup().await?;
    if removed == 0 {
        println!("Nothing to clean up.");
    } else {
        println!("\x1b[32m✓\x1b[0m Removed {} partial download(s)", removed);
    }
    Ok(())
}
