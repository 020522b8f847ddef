//! Delivery address management, scoped per project

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;
use validator::Validate;

use crate::error::{is_unique_violation, AppError, AppResult, StorageResultExt};

/// Address service
#[derive(Clone)]
pub struct AddressService {
    db: PgPool,
}

/// Shipping or billing location of a project
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DeliveryAddress {
    pub id: Uuid,
    pub project_id: Uuid,
    pub label: String,
    pub contact_name: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: String,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryAddress {
    /// Address as printed on an invoice
    pub fn formatted(&self) -> String {
        let mut parts: Vec<&str> = vec![self.line1.as_str()];
        parts.extend(self.line2.as_deref());
        let locality = match (&self.postal_code, &self.state) {
            (Some(postal), Some(state)) => format!("{} {}, {}", postal, self.city, state),
            (Some(postal), None) => format!("{} {}", postal, self.city),
            (None, Some(state)) => format!("{}, {}", self.city, state),
            (None, None) => self.city.clone(),
        };
        format!("{}, {}, {}", parts.join(", "), locality, self.country)
    }
}

/// Input for creating an address
#[derive(Debug, Deserialize, Validate)]
pub struct CreateAddressInput {
    #[validate(length(min = 1, max = 100, message = "Label must be between 1 and 100 characters"))]
    pub label: String,
    #[validate(length(max = 200))]
    pub contact_name: Option<String>,
    #[validate(custom = "crate::validation::phone")]
    pub contact_phone: Option<String>,
    #[validate(email(message = "Contact email is not a valid email address"))]
    pub contact_email: Option<String>,
    #[validate(length(min = 1, max = 255, message = "Address line 1 is required"))]
    pub line1: String,
    #[validate(length(max = 255))]
    pub line2: Option<String>,
    #[validate(length(min = 1, max = 100, message = "City is required"))]
    pub city: String,
    #[validate(length(max = 100))]
    pub state: Option<String>,
    #[validate(length(max = 20))]
    pub postal_code: Option<String>,
    #[validate(custom = "crate::validation::country_code")]
    pub country: String,
    pub is_default: Option<bool>,
}

const ADDRESS_COLUMNS: &str = "id, project_id, label, contact_name, contact_phone, contact_email, \
     line1, line2, city, state, postal_code, country, is_default, created_at, updated_at";

impl AddressService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// List a project's addresses, default first
    pub async fn list_addresses(&self, project_id: Uuid) -> AppResult<Vec<DeliveryAddress>> {
        let addresses = sqlx::query_as::<_, DeliveryAddress>(&format!(
            "SELECT {} FROM delivery_addresses WHERE project_id = $1 ORDER BY is_default DESC, label",
            ADDRESS_COLUMNS
        ))
        .bind(project_id)
        .fetch_all(&self.db)
        .await
        .storage_context("list_addresses", project_id)?;

        Ok(addresses)
    }

    /// Create an address; the first address of a project becomes its default
    #[tracing::instrument(skip_all, fields(project_id = %project_id))]
    pub async fn create_address(
        &self,
        project_id: Uuid,
        created_by: Uuid,
        input: CreateAddressInput,
    ) -> AppResult<DeliveryAddress> {
        input.validate()?;

        let mut tx = self
            .db
            .begin()
            .await
            .storage_context("create_address", project_id)?;

        lock_project(&mut *tx, project_id).await?;

        let existing: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM delivery_addresses WHERE project_id = $1")
                .bind(project_id)
                .fetch_one(&mut *tx)
                .await
                .storage_context("count_addresses", project_id)?;
        let make_default = input.is_default.unwrap_or(false) || existing == 0;

        if make_default {
            clear_default(&mut *tx, project_id).await?;
        }

        let address = sqlx::query_as::<_, DeliveryAddress>(&format!(
            r#"
            INSERT INTO delivery_addresses
                (project_id, label, contact_name, contact_phone, contact_email,
                 line1, line2, city, state, postal_code, country, is_default, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {}
            "#,
            ADDRESS_COLUMNS
        ))
        .bind(project_id)
        .bind(input.label.trim())
        .bind(&input.contact_name)
        .bind(&input.contact_phone)
        .bind(&input.contact_email)
        .bind(&input.line1)
        .bind(&input.line2)
        .bind(&input.city)
        .bind(&input.state)
        .bind(&input.postal_code)
        .bind(&input.country)
        .bind(make_default)
        .bind(created_by)
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| default_address_conflict(err, "create_address", project_id))?;

        tx.commit().await.storage_context("create_address", project_id)?;

        tracing::info!(address_id = %address.id, is_default = make_default, "Delivery address created");
        Ok(address)
    }

    /// Make an address the project's default
    #[tracing::instrument(skip_all, fields(project_id = %project_id, address_id = %address_id))]
    pub async fn set_default_address(
        &self,
        project_id: Uuid,
        address_id: Uuid,
    ) -> AppResult<DeliveryAddress> {
        let mut tx = self
            .db
            .begin()
            .await
            .storage_context("set_default_address", address_id)?;

        lock_project(&mut *tx, project_id).await?;

        let address = find_address(&mut *tx, address_id)
            .await?
            .filter(|a| a.project_id == project_id)
            .ok_or_else(|| AppError::NotFound("Delivery address".to_string()))?;

        if address.is_default {
            return Ok(address);
        }

        clear_default(&mut *tx, project_id).await?;

        let address = sqlx::query_as::<_, DeliveryAddress>(&format!(
            "UPDATE delivery_addresses SET is_default = TRUE, updated_at = NOW() WHERE id = $1 RETURNING {}",
            ADDRESS_COLUMNS
        ))
        .bind(address_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| default_address_conflict(err, "set_default_address", project_id))?;

        tx.commit().await.storage_context("set_default_address", address_id)?;

        tracing::info!("Default delivery address changed");
        Ok(address)
    }
}

async fn clear_default(conn: &mut PgConnection, project_id: Uuid) -> AppResult<()> {
    sqlx::query(
        "UPDATE delivery_addresses SET is_default = FALSE, updated_at = NOW() \
         WHERE project_id = $1 AND is_default",
    )
    .bind(project_id)
    .execute(conn)
    .await
    .storage_context("clear_default_address", project_id)?;
    Ok(())
}

/// Serialize default-address changes of a project for the rest of the transaction
async fn lock_project(conn: &mut PgConnection, project_id: Uuid) -> AppResult<()> {
    sqlx::query_scalar::<_, Uuid>("SELECT id FROM projects WHERE id = $1 FOR UPDATE")
        .bind(project_id)
        .fetch_optional(conn)
        .await
        .storage_context("lock_project", project_id)?
        .map(|_| ())
        .ok_or_else(|| AppError::NotFound("Project".to_string()))
}

/// A second default for the project lost a race with a concurrent writer
fn default_address_conflict(err: sqlx::Error, operation: &'static str, project_id: Uuid) -> AppError {
    if is_unique_violation(&err) {
        tracing::warn!(%project_id, "Default address changed concurrently");
        AppError::validation("is_default", "Default address changed concurrently, please retry")
    } else {
        AppError::infrastructure(operation, project_id, err)
    }
}

pub(crate) async fn ensure_project_exists(conn: &mut PgConnection, project_id: Uuid) -> AppResult<()> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM projects WHERE id = $1)")
        .bind(project_id)
        .fetch_one(conn)
        .await
        .storage_context("find_project", project_id)?;

    if exists {
        Ok(())
    } else {
        Err(AppError::NotFound("Project".to_string()))
    }
}

pub(crate) async fn find_address(
    conn: &mut PgConnection,
    address_id: Uuid,
) -> AppResult<Option<DeliveryAddress>> {
    let address = sqlx::query_as::<_, DeliveryAddress>(&format!(
        "SELECT {} FROM delivery_addresses WHERE id = $1",
        ADDRESS_COLUMNS
    ))
    .bind(address_id)
    .fetch_optional(conn)
    .await
    .storage_context("find_address", address_id)?;

    Ok(address)
}

/// Load an address that an order of `project_id` may ship or bill to
pub(crate) async fn project_address(
    conn: &mut PgConnection,
    project_id: Uuid,
    address_id: Uuid,
    field: &'static str,
) -> AppResult<DeliveryAddress> {
    let address = find_address(conn, address_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Delivery address".to_string()))?;

    if address.project_id != project_id {
        return Err(AppError::validation(
            field,
            "Address belongs to a different project",
        ));
    }
    Ok(address)
}
