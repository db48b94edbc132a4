use sqlx::Row;

use crate::error::{KdcError, Result};

use super::{Storage, now_ts, storage_err};

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Zone {
    pub name: String,
    pub service_id: Option<String>,
    pub active: bool,
    pub comment: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

fn zone_from_row(row: &sqlx::any::AnyRow) -> Result<Zone> {
    Ok(Zone {
        name: row.try_get("name").map_err(|e| storage_err("decode zone", e))?,
        service_id: row
            .try_get("service_id")
            .map_err(|e| storage_err("decode zone", e))?,
        active: row
            .try_get::<i64, _>("active")
            .map_err(|e| storage_err("decode zone", e))?
            != 0,
        comment: row
            .try_get("comment")
            .map_err(|e| storage_err("decode zone", e))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| storage_err("decode zone", e))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(|e| storage_err("decode zone", e))?,
    })
}

impl Storage {
    pub async fn add_zone(
        &self,
        name: &str,
        service_id: Option<&str>,
        comment: Option<&str>,
    ) -> Result<Zone> {
        if name.trim_end_matches('.').is_empty() {
            return Err(KdcError::ValidationError("zone name is empty".to_string()));
        }
        if let Some(service) = service_id {
            self.get_service(service).await?;
        }
        let now = now_ts();
        let res = sqlx::query(
            "INSERT INTO zones (name, service_id, active, comment, created_at, updated_at) \
             VALUES (?, ?, 1, ?, ?, ?)",
        )
        .bind(name)
        .bind(service_id)
        .bind(comment)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await;
        match res {
            Ok(_) => self.get_zone(name).await,
            Err(e) if super::is_unique_violation(&e) => {
                Err(KdcError::Conflict(format!("zone already exists: {}", name)))
            }
            Err(e) => Err(storage_err("insert zone", e)),
        }
    }

    pub async fn get_zone(&self, name: &str) -> Result<Zone> {
        let row = sqlx::query("SELECT * FROM zones WHERE name = ?")
            .bind(name)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| storage_err("select zone", e))?;
        match row {
            Some(row) => zone_from_row(&row),
            None => Err(KdcError::ZoneNotFound(name.to_string())),
        }
    }

    pub async fn list_zones(&self) -> Result<Vec<Zone>> {
        let rows = sqlx::query("SELECT * FROM zones ORDER BY name")
            .fetch_all(self.pool())
            .await
            .map_err(|e| storage_err("list zones", e))?;
        rows.iter().map(zone_from_row).collect()
    }

    /// Zones belonging to a service, the default service also claiming
    /// zones with no explicit reference.
    pub async fn list_zones_for_service(&self, service_id: &str) -> Result<Vec<Zone>> {
        let rows = if service_id == super::DEFAULT_SERVICE {
            sqlx::query("SELECT * FROM zones WHERE service_id = ? OR service_id IS NULL")
                .bind(service_id)
                .fetch_all(self.pool())
                .await
        } else {
            sqlx::query("SELECT * FROM zones WHERE service_id = ?")
                .bind(service_id)
                .fetch_all(self.pool())
                .await
        }
        .map_err(|e| storage_err("list zones for service", e))?;
        rows.iter().map(zone_from_row).collect()
    }

    pub async fn update_zone(
        &self,
        name: &str,
        service_id: Option<Option<&str>>,
        active: Option<bool>,
        comment: Option<&str>,
    ) -> Result<Zone> {
        let zone = self.get_zone(name).await?;
        let new_service = match service_id {
            Some(update) => {
                if let Some(service) = update {
                    self.get_service(service).await?;
                }
                update.map(|s| s.to_string())
            }
            None => zone.service_id.clone(),
        };
        let new_active = active.unwrap_or(zone.active);
        let new_comment = match comment {
            Some(c) => Some(c.to_string()),
            None => zone.comment.clone(),
        };
        sqlx::query(
            "UPDATE zones SET service_id = ?, active = ?, comment = ?, updated_at = ? \
             WHERE name = ?",
        )
        .bind(&new_service)
        .bind(new_active as i64)
        .bind(&new_comment)
        .bind(now_ts())
        .bind(name)
        .execute(self.pool())
        .await
        .map_err(|e| storage_err("update zone", e))?;
        self.get_zone(name).await
    }

    /// Delete a zone; keys, distribution records and confirmations go with
    /// it via cascade.
    pub async fn delete_zone(&self, name: &str) -> Result<()> {
        let res = sqlx::query("DELETE FROM zones WHERE name = ?")
            .bind(name)
            .execute(self.pool())
            .await
            .map_err(|e| storage_err("delete zone", e))?;
        if res.rows_affected() == 0 {
            return Err(KdcError::ZoneNotFound(name.to_string()));
        }
        Ok(())
    }
}
