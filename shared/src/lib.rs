//! Shared domain types for the Delivery Lifecycle Management service
//!
//! Pure business rules (status machines, cost and invoice arithmetic,
//! payment application, metrics) live here so they can be exercised
//! without a database.

pub mod error;
pub mod models;
pub mod types;
pub mod validation;

pub use error::*;
pub use models::*;
pub use types::*;
pub use validation::*;
