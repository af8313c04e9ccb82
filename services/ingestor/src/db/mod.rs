//! Postgres mirror of the committed cluster state.
//!
//! The mirror is optional: the ingestor serves from memory and only writes
//! here when `CLUSTERBOARD_PERSIST` is set. When enabled, each commit lands
//! in one transaction (see [`PgStateSink`]) and startup reads the last
//! commit back with [`load_committed_state`].

mod error;
mod state;

pub use error::DbError;
pub use state::{load_committed_state, PgStateSink};

use std::path::PathBuf;
use std::time::Duration;

use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

/// Directories searched for migrations, relative to the working directory.
const MIGRATION_DIRS: [&str; 2] = ["./migrations", "services/ingestor/migrations"];

/// Connection settings for the mirror database.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long a commit waits for a free connection before failing.
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/clusterboard".to_string(),
            max_connections: 5,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl DbConfig {
    /// Read `DATABASE_URL`, `DB_MAX_CONNECTIONS` and `DB_MIN_CONNECTIONS`,
    /// keeping the default for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let number = |name: &str, fallback: u32| {
            std::env::var(name)
                .ok()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(fallback)
        };

        Self {
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            max_connections: number("DB_MAX_CONNECTIONS", defaults.max_connections),
            min_connections: number("DB_MIN_CONNECTIONS", defaults.min_connections),
            acquire_timeout: defaults.acquire_timeout,
        }
    }
}

/// Pool handle for the mirror database.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connecting to mirror database"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.database_url)
            .await
            .map_err(DbError::Connect)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;
        Ok(())
    }

    /// Apply the mirror schema from the first migrations directory found.
    pub async fn run_migrations(&self) -> Result<(), DbError> {
        let candidates: Vec<PathBuf> = MIGRATION_DIRS
            .iter()
            .map(PathBuf::from)
            .chain(std::iter::once(
                PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations"),
            ))
            .collect();

        let mut last_error = None;
        for dir in &candidates {
            match Migrator::new(dir.clone()).await {
                Ok(migrator) => {
                    debug!(dir = %dir.display(), "Found migrations");
                    migrator.run(&self.pool).await.map_err(DbError::Migration)?;
                    info!(dir = %dir.display(), "Mirror schema up to date");
                    return Ok(());
                }
                Err(e) => last_error = Some(e.to_string()),
            }
        }

        Err(DbError::MigrationDirNotFound {
            tried: candidates
                .iter()
                .map(|dir| dir.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            last_error: last_error.unwrap_or_else(|| "no candidates".to_string()),
        })
    }

    /// A commit sink writing into this database.
    pub fn state_sink(&self) -> PgStateSink {
        PgStateSink::new(self.pool.clone())
    }
}
