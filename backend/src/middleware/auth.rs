//! Authentication middleware
//!
//! JWT authentication and permission checks for the delivery and invoicing API

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::AppState;

/// Role that bypasses permission checks
pub const ADMIN_ROLE: &str = "admin";

/// Permissions checked by the handlers
pub mod permissions {
    pub const DELIVERY_READ: &str = "delivery:read";
    pub const DELIVERY_WRITE: &str = "delivery:write";
    pub const INVOICE_READ: &str = "invoice:read";
    pub const INVOICE_WRITE: &str = "invoice:write";
    pub const PAYMENT_WRITE: &str = "payment:write";
}

/// Authenticated user information extracted from JWT
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: String,
    pub permissions: Vec<String>,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == ADMIN_ROLE
    }

    /// Check if user has a specific permission
    pub fn has_permission(&self, permission: &str) -> bool {
        self.is_admin() || self.permissions.iter().any(|p| p == permission)
    }

    /// Fail with `InsufficientPermissions` unless the permission is held
    pub fn require_permission(&self, permission: &str) -> AppResult<()> {
        if self.has_permission(permission) {
            Ok(())
        } else {
            tracing::warn!(
                user_id = %self.user_id,
                permission,
                "Permission denied"
            );
            Err(AppError::InsufficientPermissions)
        }
    }
}

/// Authentication middleware that validates JWT tokens against the configured secret
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match bearer_token(&request) {
        Some(token) => token,
        None => {
            return AppError::Unauthorized("Missing or invalid Authorization header".to_string())
                .into_response()
        }
    };

    let auth_user = match decode_jwt(token, &state.config.jwt.secret).and_then(AuthUser::try_from) {
        Ok(user) => user,
        Err(err) => return err.into_response(),
    };

    request.extensions_mut().insert(auth_user);

    next.run(request).await
}

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// JWT claims structure
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub exp: i64,
    pub iat: i64,
}

impl TryFrom<Claims> for AuthUser {
    type Error = AppError;

    fn try_from(claims: Claims) -> Result<Self, Self::Error> {
        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| AppError::Unauthorized("Invalid user ID in token".to_string()))?;

        Ok(AuthUser {
            user_id,
            role: claims.role,
            permissions: claims.permissions,
        })
    }
}

/// Decode and validate JWT token
fn decode_jwt(token: &str, secret: &str) -> AppResult<Claims> {
    use jsonwebtoken::{decode, DecodingKey, Validation};

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| AppError::Unauthorized(format!("Invalid token: {}", e)))
}

/// Extractor for authenticated user
/// Use this in handlers to get the current user
#[derive(Clone, Debug)]
pub struct CurrentUser(pub AuthUser);

#[axum::async_trait]
impl<S> axum::extract::FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .map(CurrentUser)
            .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))
    }
}

impl CurrentUser {
    pub fn user_id(&self) -> Uuid {
        self.0.user_id
    }

    pub fn require(&self, permission: &str) -> AppResult<()> {
        self.0.require_permission(permission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "a-test-secret-that-is-long-enough-0123";

    fn user(role: &str, permissions: &[&str]) -> AuthUser {
        AuthUser {
            user_id: Uuid::new_v4(),
            role: role.to_string(),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
        }
    }

    fn token_for(sub: &str, exp_offset: i64) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: sub.to_string(),
            role: "logistics".to_string(),
            permissions: vec![permissions::DELIVERY_READ.to_string()],
            exp: now + exp_offset,
            iat: now,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    #[test]
    fn test_permission_check() {
        let reader = user("logistics", &[permissions::DELIVERY_READ]);
        assert!(reader.require_permission(permissions::DELIVERY_READ).is_ok());
        assert!(matches!(
            reader.require_permission(permissions::PAYMENT_WRITE),
            Err(AppError::InsufficientPermissions)
        ));
    }

    #[test]
    fn test_admin_bypasses_permissions() {
        let admin = user(ADMIN_ROLE, &[]);
        assert!(admin.require_permission(permissions::INVOICE_WRITE).is_ok());
    }

    #[test]
    fn test_valid_token_decodes_to_user() {
        let user_id = Uuid::new_v4();
        let claims = decode_jwt(&token_for(&user_id.to_string(), 3600), SECRET).unwrap();
        let auth_user = AuthUser::try_from(claims).unwrap();
        assert_eq!(auth_user.user_id, user_id);
        assert!(auth_user.has_permission(permissions::DELIVERY_READ));
    }

    #[test]
    fn test_expired_or_foreign_token_rejected() {
        let sub = Uuid::new_v4().to_string();
        assert!(decode_jwt(&token_for(&sub, -3600), SECRET).is_err());
        assert!(decode_jwt(&token_for(&sub, 3600), "another-secret-that-is-long-enough-xx").is_err());
    }

    #[test]
    fn test_non_uuid_subject_rejected() {
        let claims = decode_jwt(&token_for("not-a-uuid", 3600), SECRET).unwrap();
        assert!(AuthUser::try_from(claims).is_err());
    }
}
