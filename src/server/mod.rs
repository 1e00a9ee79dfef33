//! HTTP server module

mod routes;
mod state;

pub use state::AppState;
use routes::create_router;

use anyhow::Result;
use modeldepot::ModelDepot;
use std::sync::Arc;
use tracing::info;

/// Run the HTTP server
pub async fn run_server(depot: Arc<ModelDepot>, port: u16) -> Result<()> {
    // Warm the catalog so the first request does not pay for the fetch
    let catalog = depot.catalog().await;
    info!(entries = catalog.entries.len(), "Catalog loaded");

    let removed = depot.cleanup().await?;
    if removed > 0 {
        info!(removed, "Removed stale partial downloads");
    }

    let state = Arc::new(AppState { depot });
    let app = create_router(state);

    let listener = match tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await {
        Ok(l) => l,
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            eprintln!("\n\x1b[31mError:\x1b[0m Port {} is already in use.\n", port);
            eprintln!("Try a different port with:");
            eprintln!("  \x1b[36mmodeldepot serve --port <PORT>\x1b[0m\n");
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    println!("Server running on http://localhost:{}", port);
    println!("\nAPI Endpoints:");
    println!("  GET    /health                  - Health check");
    println!("  GET    /api/catalog             - Model catalog (?tag=, ?refresh=true)");
    println!("  GET    /api/models              - Downloaded models");
    println!("  DELETE /api/models/:id          - Delete a downloaded model");
    println!("  POST   /api/models/:id/activate - Set the active model");
    println!("  POST   /api/downloads           - Start a download {{\"model_id\": ...}}");
    println!("  GET    /api/downloads           - List downloads");
    println!("  GET    /api/downloads/:id       - Download progress");
    println!("  DELETE /api/downloads/:id       - Cancel a download");
    println!("  GET    /api/storage             - Storage usage");

    axum::serve(listener, app).await?;
    Ok(())
}
