//! Durable relational store for the KDC model. All persisted entities are
//! owned here; everything above holds only references.

pub mod distributions;
pub mod keys;
pub mod nodes;
pub mod services;
pub mod zones;

pub use distributions::{Confirmation, DistStatus, Distribution};
pub use keys::DnssecKey;
pub use nodes::{Node, NodeComponent, NodeState};
pub use services::{Component, Service};
pub use zones::Zone;

use sqlx::any::{AnyPoolOptions, install_default_drivers};
use sqlx::{AnyPool, Executor};
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::error::{KdcError, Result};
use crate::keys::{
    LEGACY_EDGE_FULL_COMPONENT, SIGNING_COMPONENT_PREFIX, SYSTEM_COMPONENTS, SigningMode,
};

/// Identifier of the pre-created system service every unparented zone
/// belongs to.
pub const DEFAULT_SERVICE: &str = "default_service";

#[derive(Clone)]
pub struct Storage {
    pool: AnyPool,
    sqlite: bool,
}

pub(crate) fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

pub(crate) fn new_id(prefix: &str) -> String {
    format!("{}-{:016x}", prefix, rand::random::<u64>())
}

pub(crate) fn storage_err(context: &str, err: sqlx::Error) -> KdcError {
    match &err {
        sqlx::Error::Database(db) => {
            let msg = db.message().to_string();
            if msg.contains("locked") || msg.contains("busy") {
                KdcError::StorageBusy(format!("{}: {}", context, msg))
            } else {
                KdcError::Storage(format!("{}: {}", context, msg))
            }
        }
        _ => KdcError::Storage(format!("{}: {}", context, err)),
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

const SCHEMA: [&str; 9] = [
    "CREATE TABLE IF NOT EXISTS services (
        id VARCHAR(191) PRIMARY KEY,
        name VARCHAR(255) NOT NULL,
        active BIGINT NOT NULL DEFAULT 1,
        created_at BIGINT NOT NULL,
        updated_at BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS components (
        id VARCHAR(191) PRIMARY KEY,
        name VARCHAR(255) NOT NULL,
        active BIGINT NOT NULL DEFAULT 1,
        created_at BIGINT NOT NULL,
        updated_at BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS service_components (
        service_id VARCHAR(191) NOT NULL,
        component_id VARCHAR(191) NOT NULL,
        PRIMARY KEY (service_id, component_id),
        FOREIGN KEY (service_id) REFERENCES services(id) ON DELETE CASCADE,
        FOREIGN KEY (component_id) REFERENCES components(id) ON DELETE CASCADE
    )",
    "CREATE TABLE IF NOT EXISTS zones (
        name VARCHAR(191) PRIMARY KEY,
        service_id VARCHAR(191) NULL,
        active BIGINT NOT NULL DEFAULT 1,
        comment TEXT NULL,
        created_at BIGINT NOT NULL,
        updated_at BIGINT NOT NULL,
        FOREIGN KEY (service_id) REFERENCES services(id) ON DELETE SET NULL
    )",
    "CREATE TABLE IF NOT EXISTS nodes (
        id VARCHAR(191) PRIMARY KEY,
        name VARCHAR(255) NULL,
        public_key VARCHAR(64) NOT NULL UNIQUE,
        notify_addr VARCHAR(255) NULL,
        state VARCHAR(32) NOT NULL,
        created_at BIGINT NOT NULL,
        updated_at BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS node_components (
        node_id VARCHAR(191) NOT NULL,
        component_id VARCHAR(191) NOT NULL,
        active BIGINT NOT NULL DEFAULT 1,
        since BIGINT NOT NULL,
        PRIMARY KEY (node_id, component_id),
        FOREIGN KEY (node_id) REFERENCES nodes(id) ON DELETE CASCADE,
        FOREIGN KEY (component_id) REFERENCES components(id) ON DELETE CASCADE
    )",
    "CREATE TABLE IF NOT EXISTS dnssec_keys (
        id VARCHAR(191) PRIMARY KEY,
        zone VARCHAR(191) NOT NULL,
        key_type VARCHAR(8) NOT NULL,
        key_tag BIGINT NOT NULL,
        algorithm BIGINT NOT NULL,
        flags BIGINT NOT NULL,
        public_key TEXT NOT NULL,
        private_key BLOB NOT NULL,
        state VARCHAR(32) NOT NULL,
        published_at BIGINT NULL,
        activated_at BIGINT NULL,
        retired_at BIGINT NULL,
        created_at BIGINT NOT NULL,
        FOREIGN KEY (zone) REFERENCES zones(name) ON DELETE CASCADE
    )",
    "CREATE TABLE IF NOT EXISTS distributions (
        id VARCHAR(191) PRIMARY KEY,
        zone VARCHAR(191) NOT NULL,
        key_id VARCHAR(191) NOT NULL,
        node_id VARCHAR(191) NOT NULL,
        package BLOB NOT NULL,
        ephemeral_key VARCHAR(64) NOT NULL,
        status VARCHAR(32) NOT NULL,
        dist_id VARCHAR(8) NOT NULL,
        created_at BIGINT NOT NULL,
        completed_at BIGINT NULL,
        UNIQUE (dist_id, node_id),
        FOREIGN KEY (zone) REFERENCES zones(name) ON DELETE CASCADE,
        FOREIGN KEY (key_id) REFERENCES dnssec_keys(id) ON DELETE CASCADE,
        FOREIGN KEY (node_id) REFERENCES nodes(id) ON DELETE CASCADE
    )",
    "CREATE TABLE IF NOT EXISTS distribution_confirmations (
        dist_id VARCHAR(8) NOT NULL,
        zone VARCHAR(191) NOT NULL,
        key_id VARCHAR(191) NOT NULL,
        node_id VARCHAR(191) NOT NULL,
        confirmed_at BIGINT NOT NULL,
        PRIMARY KEY (dist_id, node_id),
        FOREIGN KEY (zone) REFERENCES zones(name) ON DELETE CASCADE,
        FOREIGN KEY (node_id) REFERENCES nodes(id) ON DELETE CASCADE
    )",
];

impl Storage {
    /// Open the database described by `config` and run the idempotent
    /// bootstrap: schema creation, system rows, legacy migration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        install_default_drivers();

        let sqlite = config.db_type == "sqlite";
        let url = match config.db_type.as_str() {
            "sqlite" => {
                if config.dsn == ":memory:" {
                    "sqlite::memory:".to_string()
                } else {
                    format!("sqlite://{}?mode=rwc", config.dsn)
                }
            }
            "mariadb" => {
                if config.dsn.starts_with("mysql://") {
                    config.dsn.clone()
                } else {
                    format!("mysql://{}", config.dsn)
                }
            }
            other => {
                return Err(KdcError::ConfigParseError(format!(
                    "unknown database type: {}",
                    other
                )));
            }
        };

        let mut options = AnyPoolOptions::new().max_connections(8);
        if sqlite {
            // In-memory databases vanish with their connection; keep one.
            if url == "sqlite::memory:" {
                options = options.max_connections(1).min_connections(1);
            }
            options = options.after_connect(|conn, _meta| {
                Box::pin(async move {
                    conn.execute("PRAGMA busy_timeout = 5000").await?;
                    conn.execute("PRAGMA journal_mode = WAL").await?;
                    conn.execute("PRAGMA foreign_keys = ON").await?;
                    Ok(())
                })
            });
        }

        let pool = options
            .connect(&url)
            .await
            .map_err(|e| storage_err("connect database", e))?;

        let storage = Storage { pool, sqlite };
        storage.bootstrap().await?;
        Ok(storage)
    }

    pub(crate) fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn is_sqlite(&self) -> bool {
        self.sqlite
    }

    async fn bootstrap(&self) -> Result<()> {
        for ddl in SCHEMA {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .map_err(|e| storage_err("create schema", e))?;
        }

        self.ensure_default_service().await?;
        self.ensure_system_components().await?;
        self.migrate_legacy_components().await?;
        info!("storage bootstrap complete");
        Ok(())
    }

    async fn ensure_default_service(&self) -> Result<()> {
        let now = now_ts();
        let existing: Option<(String,)> =
            sqlx::query_as("SELECT id FROM services WHERE id = ?")
                .bind(DEFAULT_SERVICE)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| storage_err("lookup default service", e))?;
        if existing.is_none() {
            sqlx::query(
                "INSERT INTO services (id, name, active, created_at, updated_at) \
                 VALUES (?, ?, 1, ?, ?)",
            )
            .bind(DEFAULT_SERVICE)
            .bind("Default service")
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| storage_err("create default service", e))?;
            debug!("created system service {}", DEFAULT_SERVICE);
        }
        Ok(())
    }

    async fn ensure_system_components(&self) -> Result<()> {
        let now = now_ts();
        for id in SYSTEM_COMPONENTS {
            let existing: Option<(String,)> =
                sqlx::query_as("SELECT id FROM components WHERE id = ?")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| storage_err("lookup system component", e))?;
            if existing.is_none() {
                let mode = SigningMode::from_component(id)
                    .map(|m| m.as_str())
                    .unwrap_or("unknown");
                sqlx::query(
                    "INSERT INTO components (id, name, active, created_at, updated_at) \
                     VALUES (?, ?, 1, ?, ?)",
                )
                .bind(id)
                .bind(format!("Zone signing: {}", mode))
                .bind(now)
                .bind(now)
                .execute(&self.pool)
                .await
                .map_err(|e| storage_err("create system component", e))?;
                debug!("created system component {}", id);
            }
        }
        Ok(())
    }

    /// Rewrite assignments of the pre-rename `sign_edge_all` component to
    /// `sign_edge_full` in one transaction, then drop the legacy row.
    async fn migrate_legacy_components(&self) -> Result<()> {
        let legacy: Option<(String,)> =
            sqlx::query_as("SELECT id FROM components WHERE id = ?")
                .bind(LEGACY_EDGE_FULL_COMPONENT)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| storage_err("lookup legacy component", e))?;
        if legacy.is_none() {
            return Ok(());
        }

        info!(
            "migrating legacy component {} to sign_edge_full",
            LEGACY_EDGE_FULL_COMPONENT
        );
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_err("begin legacy migration", e))?;

        let services: Vec<(String,)> = sqlx::query_as(
            "SELECT service_id FROM service_components WHERE component_id = ?",
        )
        .bind(LEGACY_EDGE_FULL_COMPONENT)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| storage_err("read legacy service assignments", e))?;
        for (service_id,) in services {
            let res = sqlx::query(
                "INSERT INTO service_components (service_id, component_id) VALUES (?, ?)",
            )
            .bind(&service_id)
            .bind("sign_edge_full")
            .execute(&mut *tx)
            .await;
            match res {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {}
                Err(e) => return Err(storage_err("rewrite service assignment", e)),
            }
        }

        let nodes: Vec<(String, i64, i64)> = sqlx::query_as(
            "SELECT node_id, active, since FROM node_components WHERE component_id = ?",
        )
        .bind(LEGACY_EDGE_FULL_COMPONENT)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| storage_err("read legacy node assignments", e))?;
        for (node_id, active, since) in nodes {
            let res = sqlx::query(
                "INSERT INTO node_components (node_id, component_id, active, since) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&node_id)
            .bind("sign_edge_full")
            .bind(active)
            .bind(since)
            .execute(&mut *tx)
            .await;
            match res {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {}
                Err(e) => return Err(storage_err("rewrite node assignment", e)),
            }
        }

        // Cascades drop the old assignment rows with the component.
        sqlx::query("DELETE FROM components WHERE id = ?")
            .bind(LEGACY_EDGE_FULL_COMPONENT)
            .execute(&mut *tx)
            .await
            .map_err(|e| storage_err("drop legacy component", e))?;

        tx.commit()
            .await
            .map_err(|e| storage_err("commit legacy migration", e))?;
        Ok(())
    }

    /// Derive the signing mode for a zone: its service's first active
    /// `sign_*` component decides; central when anything is missing.
    pub async fn zone_signing_mode(&self, zone: &str) -> Result<SigningMode> {
        let service_id = self.zone_service_id(zone).await?;
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT c.id FROM components c \
             JOIN service_components sc ON sc.component_id = c.id \
             WHERE sc.service_id = ? AND c.active = 1 AND c.id LIKE ? \
             ORDER BY c.id LIMIT 1",
        )
        .bind(&service_id)
        .bind(format!("{}%", SIGNING_COMPONENT_PREFIX))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_err("lookup signing component", e))?;

        Ok(row
            .and_then(|(id,)| SigningMode::from_component(&id))
            .unwrap_or(SigningMode::Central))
    }

    pub(crate) async fn zone_service_id(&self, zone: &str) -> Result<String> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT service_id FROM zones WHERE name = ?")
                .bind(zone)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| storage_err("lookup zone service", e))?;
        match row {
            Some((service_id,)) => Ok(service_id.unwrap_or_else(|| DEFAULT_SERVICE.to_string())),
            None => Err(KdcError::ZoneNotFound(zone.to_string())),
        }
    }
}
