//! Database management commands.

use std::path::Path;

use crate::config::Config;
use crate::repository::Database;

/// Create the SQLite file and schema. Safe to run repeatedly.
pub async fn cmd_init(config: &Config) -> anyhow::Result<()> {
    let path = Path::new(&config.database.path);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let db = Database::open(path)?;
    db.init_schema().await?;
    println!("Database initialized at {}", path.display());
    Ok(())
}
