//! Gateway over the approved items produced by quality inspection
//!
//! Inspection owns `quality_approved_items`; this service only reads it and
//! decides which rows can still be shipped.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult, StorageResultExt};
use crate::services::address::ensure_project_exists;

/// Approval status an item must carry to be shipped
pub const APPROVED_STATUS: &str = "approved";

/// Approved item gateway
#[derive(Clone)]
pub struct ApprovedItemGateway {
    db: PgPool,
}

/// Approved item that can be placed on a delivery order
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct EligibleApprovedItem {
    pub id: Uuid,
    pub project_id: Uuid,
    pub bom_item_id: Uuid,
    pub approved_quantity: Decimal,
    pub approval_status: String,
    pub qc_certificate_number: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub part_number: Option<String>,
    pub description: Option<String>,
    pub unit_cost: Option<Decimal>,
}

/// Approved item row locked while an order consumes it
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LockedApprovedItem {
    pub id: Uuid,
    pub project_id: Uuid,
    pub bom_item_id: Uuid,
    pub approved_quantity: Decimal,
    pub approval_status: String,
    pub delivery_ready: bool,
    pub consumed: bool,
}

impl LockedApprovedItem {
    /// Check the item can ship on an order of `project_id`
    pub fn ensure_eligible(&self, project_id: Uuid) -> AppResult<()> {
        if self.project_id != project_id {
            return Err(AppError::validation(
                "quality_approved_item_id",
                format!("Approved item {} belongs to a different project", self.id),
            ));
        }
        if self.approval_status != APPROVED_STATUS || !self.delivery_ready {
            return Err(AppError::validation(
                "quality_approved_item_id",
                format!("Approved item {} is not ready for delivery", self.id),
            ));
        }
        if self.consumed {
            return Err(shared::DomainError::ApprovedItemConsumed(self.id).into());
        }
        Ok(())
    }
}

impl ApprovedItemGateway {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Approved, delivery-ready items of a project not yet on any order
    pub async fn list_eligible(&self, project_id: Uuid) -> AppResult<Vec<EligibleApprovedItem>> {
        let mut conn = self
            .db
            .acquire()
            .await
            .storage_context("list_eligible_items", project_id)?;
        ensure_project_exists(&mut *conn, project_id).await?;

        let items = sqlx::query_as::<_, EligibleApprovedItem>(
            r#"
            SELECT qai.id, qai.project_id, qai.bom_item_id, qai.approved_quantity,
                   qai.approval_status, qai.qc_certificate_number, qai.approved_at,
                   b.part_number, b.description, b.unit_cost
            FROM quality_approved_items qai
            LEFT JOIN bom_items b ON b.id = qai.bom_item_id
            WHERE qai.project_id = $1
              AND qai.approval_status = $2
              AND qai.delivery_ready
              AND NOT EXISTS (
                  SELECT 1 FROM delivery_items di
                  WHERE di.quality_approved_item_id = qai.id
              )
            ORDER BY qai.approved_at DESC NULLS LAST, qai.created_at DESC
            "#,
        )
        .bind(project_id)
        .bind(APPROVED_STATUS)
        .fetch_all(&mut *conn)
        .await
        .storage_context("list_eligible_items", project_id)?;

        Ok(items)
    }
}

/// Lock the requested approved items for the rest of the transaction.
///
/// Fails with `NotFound` when any requested item does not exist.
pub(crate) async fn lock_for_order(
    conn: &mut PgConnection,
    item_ids: &[Uuid],
) -> AppResult<Vec<LockedApprovedItem>> {
    let rows = sqlx::query_as::<_, LockedApprovedItem>(
        r#"
        SELECT qai.id, qai.project_id, qai.bom_item_id, qai.approved_quantity,
               qai.approval_status, qai.delivery_ready,
               EXISTS (
                   SELECT 1 FROM delivery_items di
                   WHERE di.quality_approved_item_id = qai.id
               ) AS consumed
        FROM quality_approved_items qai
        WHERE qai.id = ANY($1)
        ORDER BY qai.id
        FOR UPDATE OF qai
        "#,
    )
    .bind(item_ids)
    .fetch_all(conn)
    .await
    .map_err(|err| {
        AppError::infrastructure("lock_approved_items", format!("{:?}", item_ids), err)
    })?;

    if let Some(missing) = item_ids.iter().find(|id| !rows.iter().any(|r| r.id == **id)) {
        return Err(AppError::NotFound(format!("Approved item {}", missing)));
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn locked(project_id: Uuid) -> LockedApprovedItem {
        LockedApprovedItem {
            id: Uuid::new_v4(),
            project_id,
            bom_item_id: Uuid::new_v4(),
            approved_quantity: Decimal::from(10),
            approval_status: APPROVED_STATUS.to_string(),
            delivery_ready: true,
            consumed: false,
        }
    }

    #[test]
    fn test_eligible_item_passes() {
        let project_id = Uuid::new_v4();
        assert!(locked(project_id).ensure_eligible(project_id).is_ok());
    }

    #[test]
    fn test_consumed_item_is_validation_error() {
        let project_id = Uuid::new_v4();
        let mut item = locked(project_id);
        item.consumed = true;
        let err = item.ensure_eligible(project_id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_foreign_or_unready_item_rejected() {
        let project_id = Uuid::new_v4();
        assert!(locked(Uuid::new_v4()).ensure_eligible(project_id).is_err());

        let mut item = locked(project_id);
        item.delivery_ready = false;
        assert!(item.ensure_eligible(project_id).is_err());
    }
}
