//! Board metrics and AI summary from the command line (`orgboard summary`).

use std::path::Path;

use anyhow::{Context, Result, bail};
use orgboard::analytics;
use orgboard::config::AppConfig;
use orgboard::db::{AppDb, DbHandle};
use orgboard::server;

pub async fn cmd_summary(config: &AppConfig, db_path: &Path, board_id: i64) -> Result<()> {
    if !db_path.exists() {
        bail!(
            "Database not found at {}. Run 'orgboard init-db' first.",
            db_path.display()
        );
    }
    let db = DbHandle::new(AppDb::new(db_path)?);
    let metrics = db
        .call(move |db| analytics::board_metrics_unscoped(db, board_id))
        .await
        .with_context(|| format!("Failed to collect metrics for board {}", board_id))?;

    println!("{}", serde_json::to_string_pretty(&metrics)?);
    println!();

    let Some(client) = server::summary_client(config)? else {
        println!("AI summary disabled: set GEMINI_API_KEY to enable it.");
        return Ok(());
    };
    let prompt = analytics::build_board_prompt(&metrics);
    let summary = analytics::summarize(client.as_ref(), &prompt)
        .await
        .context("AI summary is currently unavailable")?;
    println!("{}", summary);
    Ok(())
}
