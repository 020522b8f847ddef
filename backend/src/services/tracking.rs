//! Tracking event processor
//!
//! Appends events to an order's tracking log and applies the status the
//! event type maps to. The log itself is append-only.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;
use validator::Validate;

use shared::{
    delivered_at, event_types, resolve_event_transition, DeliveryStatus, GeoCoordinates, PageRequest,
    PaginatedResponse, Pagination, TransitionPolicy,
};

use crate::error::{AppError, AppResult, StorageResultExt};

/// Tracking service
#[derive(Clone)]
pub struct TrackingService {
    db: PgPool,
    policy: TransitionPolicy,
}

/// Entry of an order's tracking log
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TrackingEvent {
    pub id: Uuid,
    pub delivery_order_id: Uuid,
    pub event_type: String,
    pub description: Option<String>,
    pub event_timestamp: DateTime<Utc>,
    pub location: Option<String>,
    pub latitude: Option<Decimal>,
    pub longitude: Option<Decimal>,
    pub carrier_status_code: Option<String>,
    pub notes: Option<String>,
    pub proof_of_delivery: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub created_by: Uuid,
}

/// Input for adding a tracking event
#[derive(Debug, Deserialize, Validate)]
pub struct AddTrackingEventInput {
    #[validate(custom = "crate::validation::event_type")]
    pub event_type: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    /// Defaults to now
    pub event_timestamp: Option<DateTime<Utc>>,
    #[validate(length(max = 255))]
    pub location: Option<String>,
    pub latitude: Option<Decimal>,
    pub longitude: Option<Decimal>,
    #[validate(custom = "crate::validation::carrier_status_code")]
    pub carrier_status_code: Option<String>,
    #[validate(length(max = 4000))]
    pub notes: Option<String>,
    pub proof_of_delivery: Option<serde_json::Value>,
}

/// Event about to be appended to a tracking log
#[derive(Debug, Clone)]
pub struct NewTrackingEvent {
    pub event_type: String,
    pub description: Option<String>,
    pub event_timestamp: DateTime<Utc>,
    pub location: Option<String>,
    pub coordinates: Option<GeoCoordinates>,
    pub carrier_status_code: Option<String>,
    pub notes: Option<String>,
    pub proof_of_delivery: Option<serde_json::Value>,
}

impl NewTrackingEvent {
    /// Event recorded on behalf of an order change
    pub fn synthesized(event_type: &str, description: impl Into<String>) -> Self {
        Self {
            event_type: event_type.to_string(),
            description: Some(description.into()),
            event_timestamp: Utc::now(),
            location: None,
            coordinates: None,
            carrier_status_code: None,
            notes: None,
            proof_of_delivery: None,
        }
    }
}

impl TryFrom<AddTrackingEventInput> for NewTrackingEvent {
    type Error = AppError;

    fn try_from(input: AddTrackingEventInput) -> Result<Self, Self::Error> {
        input.validate()?;
        let coordinates = GeoCoordinates::from_parts(input.latitude, input.longitude)?;

        Ok(Self {
            event_type: input.event_type,
            description: input.description,
            event_timestamp: input.event_timestamp.unwrap_or_else(Utc::now),
            location: input.location,
            coordinates,
            carrier_status_code: input.carrier_status_code,
            notes: input.notes,
            proof_of_delivery: input.proof_of_delivery,
        })
    }
}

/// Result of adding a tracking event
#[derive(Debug, Clone, Serialize)]
pub struct TrackingEventOutcome {
    pub event: TrackingEvent,
    pub previous_status: DeliveryStatus,
    pub status: DeliveryStatus,
    pub status_changed: bool,
}

const EVENT_COLUMNS: &str = "id, delivery_order_id, event_type, description, event_timestamp, \
     location, latitude, longitude, carrier_status_code, notes, proof_of_delivery, created_at, created_by";

impl TrackingService {
    pub fn new(db: PgPool, policy: TransitionPolicy) -> Self {
        Self { db, policy }
    }

    /// Append an event and apply the status it maps to
    #[tracing::instrument(skip_all, fields(order_id = %order_id, event_type = %input.event_type))]
    pub async fn add_tracking_event(
        &self,
        order_id: Uuid,
        input: AddTrackingEventInput,
        actor: Uuid,
    ) -> AppResult<TrackingEventOutcome> {
        let event = NewTrackingEvent::try_from(input)?;

        let mut tx = self
            .db
            .begin()
            .await
            .storage_context("add_tracking_event", order_id)?;

        let current: String =
            sqlx::query_scalar("SELECT status FROM delivery_orders WHERE id = $1 FOR UPDATE")
                .bind(order_id)
                .fetch_optional(&mut *tx)
                .await
                .storage_context("lock_delivery_order", order_id)?
                .ok_or_else(|| AppError::NotFound("Delivery order".to_string()))?;
        let current = DeliveryStatus::try_from(current).map_err(|e| AppError::Internal(e.to_string()))?;

        let next = match resolve_event_transition(current, &event.event_type, self.policy) {
            Ok(next) => next,
            Err(err) => {
                tracing::warn!(from = %current, "Tracking event rejected by transition table");
                return Err(err.into());
            }
        };

        let stored = append_event(&mut *tx, order_id, &event, actor).await?;

        if let Some(next) = next {
            apply_event_status(&mut *tx, order_id, next, event.event_timestamp, actor).await?;
        }

        tx.commit().await.storage_context("add_tracking_event", order_id)?;

        let status = next.unwrap_or(current);
        if status != current {
            tracing::info!(from = %current, to = %status, "Delivery order status changed by tracking event");
        }

        Ok(TrackingEventOutcome {
            event: stored,
            previous_status: current,
            status,
            status_changed: status != current,
        })
    }

    /// Tracking log of an order, most recent first
    pub async fn list_events(
        &self,
        order_id: Uuid,
        page: &PageRequest,
    ) -> AppResult<PaginatedResponse<TrackingEvent>> {
        let mut conn = self
            .db
            .acquire()
            .await
            .storage_context("list_tracking_events", order_id)?;

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM delivery_orders WHERE id = $1)")
                .bind(order_id)
                .fetch_one(&mut *conn)
                .await
                .storage_context("find_delivery_order", order_id)?;
        if !exists {
            return Err(AppError::NotFound("Delivery order".to_string()));
        }

        let pagination = page.normalize();
        let (events, total) = event_page(&mut *conn, order_id, pagination).await?;

        Ok(PaginatedResponse::new(events, pagination, total))
    }
}

/// One page of an order's tracking log and the total event count
pub(crate) async fn event_page(
    conn: &mut PgConnection,
    order_id: Uuid,
    pagination: Pagination,
) -> AppResult<(Vec<TrackingEvent>, u64)> {
    let total: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM tracking_events WHERE delivery_order_id = $1")
            .bind(order_id)
            .fetch_one(&mut *conn)
            .await
            .storage_context("count_tracking_events", order_id)?;

    let events = sqlx::query_as::<_, TrackingEvent>(&format!(
        r#"
        SELECT {}
        FROM tracking_events
        WHERE delivery_order_id = $1
        ORDER BY event_timestamp DESC, created_at DESC
        LIMIT $2 OFFSET $3
        "#,
        EVENT_COLUMNS
    ))
    .bind(order_id)
    .bind(pagination.limit())
    .bind(pagination.offset())
    .fetch_all(&mut *conn)
    .await
    .storage_context("list_tracking_events", order_id)?;

    Ok((events, u64::try_from(total).unwrap_or_default()))
}

/// Append an event to the tracking log inside the caller's transaction
pub(crate) async fn append_event(
    conn: &mut PgConnection,
    order_id: Uuid,
    event: &NewTrackingEvent,
    actor: Uuid,
) -> AppResult<TrackingEvent> {
    sqlx::query_as::<_, TrackingEvent>(&format!(
        r#"
        INSERT INTO tracking_events
            (delivery_order_id, event_type, description, event_timestamp, location,
             latitude, longitude, carrier_status_code, notes, proof_of_delivery, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING {}
        "#,
        EVENT_COLUMNS
    ))
    .bind(order_id)
    .bind(&event.event_type)
    .bind(&event.description)
    .bind(event.event_timestamp)
    .bind(&event.location)
    .bind(event.coordinates.map(|c| c.latitude))
    .bind(event.coordinates.map(|c| c.longitude))
    .bind(&event.carrier_status_code)
    .bind(&event.notes)
    .bind(&event.proof_of_delivery)
    .bind(actor)
    .fetch_one(conn)
    .await
    .storage_context("append_tracking_event", order_id)
}

/// Overwrite the order status; reaching delivered stamps the delivery time
async fn apply_event_status(
    conn: &mut PgConnection,
    order_id: Uuid,
    status: DeliveryStatus,
    event_timestamp: DateTime<Utc>,
    actor: Uuid,
) -> AppResult<()> {
    let delivered_at = delivered_at(status, event_timestamp);

    sqlx::query(
        r#"
        UPDATE delivery_orders
        SET status = $2,
            actual_delivery_date = COALESCE($3, actual_delivery_date),
            updated_by = $4,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(order_id)
    .bind(status.as_str())
    .bind(delivered_at)
    .bind(actor)
    .execute(conn)
    .await
    .storage_context("apply_event_status", order_id)?;

    Ok(())
}

/// Description used for the cancellation event
pub(crate) fn cancellation_event(reason: Option<&str>) -> NewTrackingEvent {
    let description = match reason {
        Some(reason) => format!("Order cancelled: {}", reason),
        None => "Order cancelled".to_string(),
    };
    NewTrackingEvent::synthesized(event_types::CANCELLED, description)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(event_type: &str) -> AddTrackingEventInput {
        AddTrackingEventInput {
            event_type: event_type.to_string(),
            description: None,
            event_timestamp: None,
            location: None,
            latitude: None,
            longitude: None,
            carrier_status_code: None,
            notes: None,
            proof_of_delivery: None,
        }
    }

    #[test]
    fn test_timestamp_defaults_to_now() {
        let before = Utc::now();
        let event = NewTrackingEvent::try_from(input("picked_up")).unwrap();
        assert!(event.event_timestamp >= before);
    }

    #[test]
    fn test_explicit_timestamp_kept() {
        let at = DateTime::parse_from_rfc3339("2024-05-02T10:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut raw = input("delivered");
        raw.event_timestamp = Some(at);
        assert_eq!(NewTrackingEvent::try_from(raw).unwrap().event_timestamp, at);
    }

    #[test]
    fn test_malformed_event_type_rejected() {
        assert!(NewTrackingEvent::try_from(input("Picked Up")).is_err());
    }

    #[test]
    fn test_half_coordinates_rejected() {
        let mut raw = input("picked_up");
        raw.latitude = Some(Decimal::from(52));
        assert!(NewTrackingEvent::try_from(raw).is_err());
    }

    #[test]
    fn test_cancellation_event_carries_reason() {
        let event = cancellation_event(Some("customer request"));
        assert_eq!(event.event_type, event_types::CANCELLED);
        assert_eq!(event.description.as_deref(), Some("Order cancelled: customer request"));
    }
}
