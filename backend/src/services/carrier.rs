//! Carrier reference data

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult, StorageResultExt};

/// Carrier service
#[derive(Clone)]
pub struct CarrierService {
    db: PgPool,
}

/// Shipping carrier
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Carrier {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub tracking_url_template: Option<String>,
    pub capabilities: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Carrier {
    /// Public tracking link for a tracking number, if the carrier publishes one
    pub fn tracking_url(&self, tracking_number: &str) -> Option<String> {
        self.tracking_url_template
            .as_deref()
            .map(|template| template.replace("{tracking_number}", tracking_number))
    }
}

/// Carrier list filter
#[derive(Debug, Default, Deserialize)]
pub struct CarrierFilter {
    /// Only active carriers (default true)
    pub active_only: Option<bool>,
}

const CARRIER_COLUMNS: &str = "id, code, name, contact_email, contact_phone, tracking_url_template, \
     capabilities, is_active, created_at, updated_at";

impl CarrierService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// List carriers ordered by name
    pub async fn list_carriers(&self, filter: &CarrierFilter) -> AppResult<Vec<Carrier>> {
        let active_only = filter.active_only.unwrap_or(true);

        let carriers = sqlx::query_as::<_, Carrier>(&format!(
            "SELECT {} FROM carriers WHERE ($1 = FALSE OR is_active) ORDER BY name",
            CARRIER_COLUMNS
        ))
        .bind(active_only)
        .fetch_all(&self.db)
        .await
        .storage_context("list_carriers", "all")?;

        Ok(carriers)
    }

    /// Get a carrier by ID
    pub async fn get_carrier(&self, carrier_id: Uuid) -> AppResult<Carrier> {
        let mut conn = self.db.acquire().await.storage_context("get_carrier", carrier_id)?;
        find_carrier(&mut *conn, carrier_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Carrier".to_string()))
    }
}

pub(crate) async fn find_carrier(
    conn: &mut PgConnection,
    carrier_id: Uuid,
) -> AppResult<Option<Carrier>> {
    let carrier = sqlx::query_as::<_, Carrier>(&format!(
        "SELECT {} FROM carriers WHERE id = $1",
        CARRIER_COLUMNS
    ))
    .bind(carrier_id)
    .fetch_optional(conn)
    .await
    .storage_context("find_carrier", carrier_id)?;

    Ok(carrier)
}

/// Load a carrier that can be assigned to an order
pub(crate) async fn assignable_carrier(
    conn: &mut PgConnection,
    carrier_id: Uuid,
) -> AppResult<Carrier> {
    let carrier = find_carrier(conn, carrier_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Carrier".to_string()))?;

    if !carrier.is_active {
        return Err(AppError::validation(
            "carrier_id",
            format!("Carrier {} is not active", carrier.code),
        ));
    }
    Ok(carrier)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn carrier(template: Option<&str>) -> Carrier {
        Carrier {
            id: Uuid::new_v4(),
            code: "DHL".to_string(),
            name: "DHL Express".to_string(),
            contact_email: None,
            contact_phone: None,
            tracking_url_template: template.map(str::to_string),
            capabilities: vec!["express".to_string()],
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_tracking_url_substitutes_number() {
        let c = carrier(Some("https://track.example.com/?id={tracking_number}"));
        assert_eq!(
            c.tracking_url("JD0002").as_deref(),
            Some("https://track.example.com/?id=JD0002")
        );
        assert!(carrier(None).tracking_url("JD0002").is_none());
    }
}
