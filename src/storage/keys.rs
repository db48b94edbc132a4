use sqlx::Row;

use crate::error::{KdcError, Result};
use crate::keys::{GeneratedKey, KeyState, KeyType};

use super::{Storage, new_id, now_ts, storage_err};

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct DnssecKey {
    pub id: String,
    pub zone: String,
    pub key_type: KeyType,
    pub key_tag: u16,
    pub algorithm: u8,
    pub flags: u16,
    pub public_key: String,
    /// Never serialized; HPKE-sealed before it leaves the process.
    #[serde(skip_serializing)]
    pub private_key: Vec<u8>,
    pub state: KeyState,
    pub published_at: Option<i64>,
    pub activated_at: Option<i64>,
    pub retired_at: Option<i64>,
    pub created_at: i64,
}

fn key_from_row(row: &sqlx::any::AnyRow) -> Result<DnssecKey> {
    let key_type_str: String = row
        .try_get("key_type")
        .map_err(|e| storage_err("decode key", e))?;
    let state_str: String = row
        .try_get("state")
        .map_err(|e| storage_err("decode key", e))?;
    Ok(DnssecKey {
        id: row.try_get("id").map_err(|e| storage_err("decode key", e))?,
        zone: row
            .try_get("zone")
            .map_err(|e| storage_err("decode key", e))?,
        key_type: KeyType::parse(&key_type_str)?,
        key_tag: row
            .try_get::<i64, _>("key_tag")
            .map_err(|e| storage_err("decode key", e))? as u16,
        algorithm: row
            .try_get::<i64, _>("algorithm")
            .map_err(|e| storage_err("decode key", e))? as u8,
        flags: row
            .try_get::<i64, _>("flags")
            .map_err(|e| storage_err("decode key", e))? as u16,
        public_key: row
            .try_get("public_key")
            .map_err(|e| storage_err("decode key", e))?,
        private_key: row
            .try_get("private_key")
            .map_err(|e| storage_err("decode key", e))?,
        state: KeyState::parse(&state_str)?,
        published_at: row
            .try_get("published_at")
            .map_err(|e| storage_err("decode key", e))?,
        activated_at: row
            .try_get("activated_at")
            .map_err(|e| storage_err("decode key", e))?,
        retired_at: row
            .try_get("retired_at")
            .map_err(|e| storage_err("decode key", e))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| storage_err("decode key", e))?,
    })
}

impl Storage {
    /// Persist a freshly generated key in state `created`.
    pub async fn add_key(
        &self,
        zone: &str,
        key_type: KeyType,
        generated: &GeneratedKey,
    ) -> Result<DnssecKey> {
        self.get_zone(zone).await?;
        let id = new_id("key");
        sqlx::query(
            "INSERT INTO dnssec_keys \
             (id, zone, key_type, key_tag, algorithm, flags, public_key, private_key, state, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(zone)
        .bind(key_type.as_str())
        .bind(generated.key_tag as i64)
        .bind(generated.algorithm as i64)
        .bind(generated.flags as i64)
        .bind(&generated.public_key)
        .bind(&generated.private_key)
        .bind(KeyState::Created.as_str())
        .bind(now_ts())
        .execute(self.pool())
        .await
        .map_err(|e| storage_err("insert key", e))?;
        self.get_key(zone, &id).await
    }

    pub async fn get_key(&self, zone: &str, key_id: &str) -> Result<DnssecKey> {
        let row = sqlx::query("SELECT * FROM dnssec_keys WHERE zone = ? AND id = ?")
            .bind(zone)
            .bind(key_id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| storage_err("select key", e))?;
        match row {
            Some(row) => key_from_row(&row),
            None => Err(KdcError::KeyNotFound(format!("{} in {}", key_id, zone))),
        }
    }

    pub async fn get_key_by_id(&self, key_id: &str) -> Result<DnssecKey> {
        let row = sqlx::query("SELECT * FROM dnssec_keys WHERE id = ?")
            .bind(key_id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| storage_err("select key", e))?;
        match row {
            Some(row) => key_from_row(&row),
            None => Err(KdcError::KeyNotFound(key_id.to_string())),
        }
    }

    pub async fn list_keys(&self, zone: &str) -> Result<Vec<DnssecKey>> {
        self.get_zone(zone).await?;
        let rows = sqlx::query("SELECT * FROM dnssec_keys WHERE zone = ? ORDER BY created_at")
            .bind(zone)
            .fetch_all(self.pool())
            .await
            .map_err(|e| storage_err("list keys", e))?;
        rows.iter().map(key_from_row).collect()
    }

    pub async fn list_all_keys(&self) -> Result<Vec<DnssecKey>> {
        let rows = sqlx::query("SELECT * FROM dnssec_keys ORDER BY zone, created_at")
            .fetch_all(self.pool())
            .await
            .map_err(|e| storage_err("list keys", e))?;
        rows.iter().map(key_from_row).collect()
    }

    pub async fn keys_in_state(
        &self,
        zone: &str,
        key_type: KeyType,
        state: KeyState,
    ) -> Result<Vec<DnssecKey>> {
        let rows = sqlx::query(
            "SELECT * FROM dnssec_keys WHERE zone = ? AND key_type = ? AND state = ? \
             ORDER BY created_at",
        )
        .bind(zone)
        .bind(key_type.as_str())
        .bind(state.as_str())
        .fetch_all(self.pool())
        .await
        .map_err(|e| storage_err("select keys by state", e))?;
        rows.iter().map(key_from_row).collect()
    }

    /// Write a new key state, maintaining the lifecycle timestamps.
    /// Transition legality is the caller's concern.
    pub async fn set_key_state(&self, key_id: &str, state: KeyState) -> Result<()> {
        let now = now_ts();
        let (column, stamp): (&str, Option<i64>) = match state {
            KeyState::Published => ("published_at", Some(now)),
            KeyState::Active | KeyState::ActiveDist | KeyState::Distributed => {
                ("activated_at", Some(now))
            }
            KeyState::Retired | KeyState::Revoked => ("retired_at", Some(now)),
            _ => ("retired_at", None),
        };
        let sql = if stamp.is_some() {
            format!(
                "UPDATE dnssec_keys SET state = ?, {} = ? WHERE id = ?",
                column
            )
        } else {
            "UPDATE dnssec_keys SET state = ? WHERE id = ?".to_string()
        };
        let mut query = sqlx::query(&sql).bind(state.as_str());
        if let Some(ts) = stamp {
            query = query.bind(ts);
        }
        let res = query
            .bind(key_id)
            .execute(self.pool())
            .await
            .map_err(|e| storage_err("update key state", e))?;
        if res.rows_affected() == 0 {
            return Err(KdcError::KeyNotFound(key_id.to_string()));
        }
        Ok(())
    }

    /// Move a key into a live state (`edge_signer` or `active_dist`),
    /// retiring previously live siblings of the same (zone, type) in the
    /// same transaction so at most one key per pair is ever live.
    pub async fn advance_to_live_state(
        &self,
        key_id: &str,
        zone: &str,
        key_type: KeyType,
        from_state: KeyState,
        to_state: KeyState,
    ) -> Result<()> {
        crate::keys::check_transition(from_state, to_state)?;
        let now = now_ts();
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| super::storage_err("begin live-state advance", e))?;

        sqlx::query(
            "UPDATE dnssec_keys SET state = ?, retired_at = ? \
             WHERE zone = ? AND key_type = ? AND id <> ? AND state IN (?, ?)",
        )
        .bind(KeyState::Retired.as_str())
        .bind(now)
        .bind(zone)
        .bind(key_type.as_str())
        .bind(key_id)
        .bind(KeyState::EdgeSigner.as_str())
        .bind(KeyState::ActiveDist.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| super::storage_err("retire live siblings", e))?;

        let res = sqlx::query(
            "UPDATE dnssec_keys SET state = ?, activated_at = ? WHERE id = ? AND state = ?",
        )
        .bind(to_state.as_str())
        .bind(now)
        .bind(key_id)
        .bind(from_state.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| super::storage_err("advance key state", e))?;
        if res.rows_affected() == 0 {
            return Err(KdcError::PreconditionFailed(format!(
                "key {} is no longer in state {}",
                key_id,
                from_state.as_str()
            )));
        }

        tx.commit()
            .await
            .map_err(|e| super::storage_err("commit live-state advance", e))
    }

    pub async fn delete_key(&self, zone: &str, key_id: &str) -> Result<()> {
        let res = sqlx::query("DELETE FROM dnssec_keys WHERE zone = ? AND id = ?")
            .bind(zone)
            .bind(key_id)
            .execute(self.pool())
            .await
            .map_err(|e| storage_err("delete key", e))?;
        if res.rows_affected() == 0 {
            return Err(KdcError::KeyNotFound(format!("{} in {}", key_id, zone)));
        }
        Ok(())
    }
}
