//! Database setup command (`orgboard init-db`).

use std::path::Path;

use anyhow::{Context, Result};
use orgboard::db::AppDb;

pub fn cmd_init_db(db_path: &Path) -> Result<()> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    AppDb::new(db_path)?;
    println!("Database initialized at {}", db_path.display());
    Ok(())
}
