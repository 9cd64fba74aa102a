//! Writes the Rehearsal OpenAPI document.
//!
//! Usage: `openapi [OUTPUT]` (defaults to `openapi.json`).

use anyhow::Context;
use rehearsal_api::router::ApiDoc;
use utoipa::OpenApi;

fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "openapi.json".to_string());

    let doc = ApiDoc::openapi()
        .to_pretty_json()
        .context("Failed to render the OpenAPI document")?;
    std::fs::write(&path, doc).with_context(|| format!("Failed to write {path}"))?;

    println!("OpenAPI document written to {path}");
    Ok(())
}
