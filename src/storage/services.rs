use sqlx::Row;

use crate::error::{KdcError, Result};
use crate::keys::SIGNING_COMPONENT_PREFIX;

use super::{DEFAULT_SERVICE, Storage, is_unique_violation, now_ts, storage_err};

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Service {
    pub id: String,
    pub name: String,
    pub active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Component {
    pub id: String,
    pub name: String,
    pub active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

fn service_from_row(row: &sqlx::any::AnyRow) -> Result<Service> {
    Ok(Service {
        id: row.try_get("id").map_err(|e| storage_err("decode service", e))?,
        name: row
            .try_get("name")
            .map_err(|e| storage_err("decode service", e))?,
        active: row
            .try_get::<i64, _>("active")
            .map_err(|e| storage_err("decode service", e))?
            != 0,
        created_at: row
            .try_get("created_at")
            .map_err(|e| storage_err("decode service", e))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(|e| storage_err("decode service", e))?,
    })
}

fn component_from_row(row: &sqlx::any::AnyRow) -> Result<Component> {
    Ok(Component {
        id: row
            .try_get("id")
            .map_err(|e| storage_err("decode component", e))?,
        name: row
            .try_get("name")
            .map_err(|e| storage_err("decode component", e))?,
        active: row
            .try_get::<i64, _>("active")
            .map_err(|e| storage_err("decode component", e))?
            != 0,
        created_at: row
            .try_get("created_at")
            .map_err(|e| storage_err("decode component", e))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(|e| storage_err("decode component", e))?,
    })
}

impl Storage {
    pub async fn add_service(&self, id: &str, name: &str) -> Result<Service> {
        if id.is_empty() {
            return Err(KdcError::ValidationError("service id is empty".to_string()));
        }
        let now = now_ts();
        let res = sqlx::query(
            "INSERT INTO services (id, name, active, created_at, updated_at) \
             VALUES (?, ?, 1, ?, ?)",
        )
        .bind(id)
        .bind(name)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await;
        match res {
            Ok(_) => self.get_service(id).await,
            Err(e) if is_unique_violation(&e) => {
                Err(KdcError::Conflict(format!("service already exists: {}", id)))
            }
            Err(e) => Err(storage_err("insert service", e)),
        }
    }

    pub async fn get_service(&self, id: &str) -> Result<Service> {
        let row = sqlx::query("SELECT * FROM services WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| storage_err("select service", e))?;
        match row {
            Some(row) => service_from_row(&row),
            None => Err(KdcError::ServiceNotFound(id.to_string())),
        }
    }

    pub async fn list_services(&self) -> Result<Vec<Service>> {
        let rows = sqlx::query("SELECT * FROM services ORDER BY id")
            .fetch_all(self.pool())
            .await
            .map_err(|e| storage_err("list services", e))?;
        rows.iter().map(service_from_row).collect()
    }

    /// The system default service cannot be deleted.
    pub async fn delete_service(&self, id: &str) -> Result<()> {
        if id == DEFAULT_SERVICE {
            return Err(KdcError::PreconditionFailed(
                "the default service cannot be deleted".to_string(),
            ));
        }
        let res = sqlx::query("DELETE FROM services WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(|e| storage_err("delete service", e))?;
        if res.rows_affected() == 0 {
            return Err(KdcError::ServiceNotFound(id.to_string()));
        }
        Ok(())
    }

    pub async fn add_component(&self, id: &str, name: &str) -> Result<Component> {
        let now = now_ts();
        let res = sqlx::query(
            "INSERT INTO components (id, name, active, created_at, updated_at) \
             VALUES (?, ?, 1, ?, ?)",
        )
        .bind(id)
        .bind(name)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await;
        match res {
            Ok(_) => self.get_component(id).await,
            Err(e) if is_unique_violation(&e) => Err(KdcError::Conflict(format!(
                "component already exists: {}",
                id
            ))),
            Err(e) => Err(storage_err("insert component", e)),
        }
    }

    pub async fn get_component(&self, id: &str) -> Result<Component> {
        let row = sqlx::query("SELECT * FROM components WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| storage_err("select component", e))?;
        match row {
            Some(row) => component_from_row(&row),
            None => Err(KdcError::ComponentNotFound(id.to_string())),
        }
    }

    pub async fn list_components(&self) -> Result<Vec<Component>> {
        let rows = sqlx::query("SELECT * FROM components ORDER BY id")
            .fetch_all(self.pool())
            .await
            .map_err(|e| storage_err("list components", e))?;
        rows.iter().map(component_from_row).collect()
    }

    /// System signing components cannot be deleted.
    pub async fn delete_component(&self, id: &str) -> Result<()> {
        if id.starts_with(SIGNING_COMPONENT_PREFIX) {
            return Err(KdcError::PreconditionFailed(format!(
                "system component cannot be deleted: {}",
                id
            )));
        }
        let res = sqlx::query("DELETE FROM components WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(|e| storage_err("delete component", e))?;
        if res.rows_affected() == 0 {
            return Err(KdcError::ComponentNotFound(id.to_string()));
        }
        Ok(())
    }

    pub async fn list_service_components(&self, service_id: &str) -> Result<Vec<Component>> {
        let rows = sqlx::query(
            "SELECT c.* FROM components c \
             JOIN service_components sc ON sc.component_id = c.id \
             WHERE sc.service_id = ? ORDER BY c.id",
        )
        .bind(service_id)
        .fetch_all(self.pool())
        .await
        .map_err(|e| storage_err("list service components", e))?;
        rows.iter().map(component_from_row).collect()
    }

    /// Attach a component to a service. A service holds at most one
    /// `sign_*` component; attaching a second is a conflict.
    pub async fn add_service_component(&self, service_id: &str, component_id: &str) -> Result<()> {
        self.get_service(service_id).await?;
        self.get_component(component_id).await?;

        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| storage_err("begin add service component", e))?;

        if component_id.starts_with(SIGNING_COMPONENT_PREFIX) {
            let existing: Option<(String,)> = sqlx::query_as(
                "SELECT component_id FROM service_components \
                 WHERE service_id = ? AND component_id LIKE ? LIMIT 1",
            )
            .bind(service_id)
            .bind(format!("{}%", SIGNING_COMPONENT_PREFIX))
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| storage_err("check signing component", e))?;
            if let Some((current,)) = existing {
                return Err(KdcError::DuplicateSigningComponent(format!(
                    "service {} already has {}",
                    service_id, current
                )));
            }
        }

        let res = sqlx::query(
            "INSERT INTO service_components (service_id, component_id) VALUES (?, ?)",
        )
        .bind(service_id)
        .bind(component_id)
        .execute(&mut *tx)
        .await;
        match res {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(KdcError::Conflict(format!(
                    "component {} already assigned to service {}",
                    component_id, service_id
                )));
            }
            Err(e) => return Err(storage_err("insert service component", e)),
        }

        tx.commit()
            .await
            .map_err(|e| storage_err("commit add service component", e))
    }

    pub async fn remove_service_component(
        &self,
        service_id: &str,
        component_id: &str,
    ) -> Result<()> {
        let res = sqlx::query(
            "DELETE FROM service_components WHERE service_id = ? AND component_id = ?",
        )
        .bind(service_id)
        .bind(component_id)
        .execute(self.pool())
        .await
        .map_err(|e| storage_err("delete service component", e))?;
        if res.rows_affected() == 0 {
            return Err(KdcError::ComponentNotFound(format!(
                "{} on service {}",
                component_id, service_id
            )));
        }
        Ok(())
    }

    /// Swap the signing component of a service atomically. The service is
    /// never observed with two signing components, and a failure leaves
    /// the previous assignment in place.
    pub async fn replace_signing_component(
        &self,
        service_id: &str,
        component_id: &str,
    ) -> Result<()> {
        if !component_id.starts_with(SIGNING_COMPONENT_PREFIX) {
            return Err(KdcError::ValidationError(format!(
                "not a signing component: {}",
                component_id
            )));
        }
        self.get_service(service_id).await?;
        self.get_component(component_id).await?;

        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| storage_err("begin replace signing component", e))?;

        sqlx::query(
            "DELETE FROM service_components WHERE service_id = ? AND component_id LIKE ?",
        )
        .bind(service_id)
        .bind(format!("{}%", SIGNING_COMPONENT_PREFIX))
        .execute(&mut *tx)
        .await
        .map_err(|e| storage_err("remove old signing component", e))?;

        sqlx::query("INSERT INTO service_components (service_id, component_id) VALUES (?, ?)")
            .bind(service_id)
            .bind(component_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| storage_err("insert new signing component", e))?;

        tx.commit()
            .await
            .map_err(|e| storage_err("commit replace signing component", e))
    }
}
