//! Business logic services for the Delivery Lifecycle Management service

pub mod address;
pub mod approved_items;
pub mod carrier;
pub mod delivery_order;
pub mod invoice;
pub mod payment;
pub mod reporting;
pub mod tracking;

pub use address::AddressService;
pub use approved_items::ApprovedItemGateway;
pub use carrier::CarrierService;
pub use delivery_order::DeliveryOrderService;
pub use invoice::InvoiceService;
pub use payment::PaymentService;
pub use reporting::ReportingService;
pub use tracking::TrackingService;
