mod models;

pub use models::*;

use anyhow::{Context, Result};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;

pub type DbPool = SqlitePool;

/// Embedded schema migrations, applied in order on every start
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_initial",
        include_str!("../../migrations/001_initial.sql"),
    ),
    (
        "002_checkout_sessions",
        include_str!("../../migrations/002_checkout_sessions.sql"),
    ),
];

/// Split a migration script into statements, dropping `--` comment lines
fn statements(script: &str) -> impl Iterator<Item = String> + '_ {
    script
        .split(';')
        .map(|chunk| {
            chunk
                .lines()
                .filter(|line| !line.trim_start().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string()
        })
        .filter(|statement| !statement.is_empty())
}

/// Open `observa.db` under `data_dir` and bring its schema up to date
pub async fn init(data_dir: &Path) -> Result<DbPool> {
    let path = data_dir.join("observa.db");
    tracing::info!(path = %path.display(), "Opening database");

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&format!("sqlite:{}?mode=rwc", path.display()))
        .await
        .with_context(|| format!("Failed to open database at {}", path.display()))?;

    // Scheduled sweeps and request handlers write concurrently
    for pragma in ["PRAGMA journal_mode = WAL", "PRAGMA synchronous = NORMAL"] {
        sqlx::query(pragma).execute(&pool).await?;
    }

    run_migrations(&pool).await?;
    Ok(pool)
}

/// Open a private in-memory database with the schema applied.
///
/// The pool is capped at a single connection: every SQLite `:memory:`
/// connection is its own database.
pub async fn init_in_memory() -> Result<DbPool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    run_migrations(&pool).await?;
    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    for (name, script) in MIGRATIONS {
        for statement in statements(script) {
            sqlx::query(&statement)
                .execute(pool)
                .await
                .with_context(|| format!("Migration {} failed", name))?;
        }
        tracing::debug!(migration = name, "Migration applied");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements_skip_comments() {
        let script = "-- header\nCREATE TABLE a (x TEXT);\n\n-- note\nCREATE INDEX i ON a(x);\n";
        let parsed: Vec<_> = statements(script).collect();
        assert_eq!(parsed, vec!["CREATE TABLE a (x TEXT)", "CREATE INDEX i ON a(x)"]);
    }

    #[tokio::test]
    async fn test_migrations_are_rerunnable() {
        let pool = init_in_memory().await.unwrap();
        run_migrations(&pool).await.unwrap();
    }
}
