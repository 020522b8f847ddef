//! Domain models for delivery orders, invoices and reporting

mod delivery;
mod invoice;
mod metrics;

pub use delivery::*;
pub use invoice::*;
pub use metrics::*;
