//! Route definitions for the Delivery Lifecycle Management service

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use crate::{handlers, middleware::auth_middleware, AppState};

/// Create API routes
pub fn api_routes(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .nest("/projects", project_routes())
        .nest("/carriers", carrier_routes())
        .nest("/delivery-orders", delivery_order_routes())
        .nest("/invoices", invoice_routes())
        .route_layer(middleware::from_fn_with_state(state, auth_middleware));

    Router::new()
        // Health check (public)
        .route("/health", get(handlers::health_check))
        .merge(protected)
}

/// Project scoped reference data
fn project_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/:project_id/approved-items",
            get(handlers::list_eligible_approved_items),
        )
        .route(
            "/:project_id/addresses",
            get(handlers::list_addresses).post(handlers::create_address),
        )
        .route(
            "/:project_id/addresses/:address_id/default",
            post(handlers::set_default_address),
        )
}

fn carrier_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_carriers))
        .route("/:carrier_id", get(handlers::get_carrier))
}

fn delivery_order_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(handlers::list_delivery_orders).post(handlers::create_delivery_order),
        )
        .route("/metrics", get(handlers::get_delivery_metrics))
        .route(
            "/:order_id",
            get(handlers::get_delivery_order).put(handlers::update_delivery_order),
        )
        .route("/:order_id/cancel", post(handlers::cancel_delivery_order))
        .route(
            "/:order_id/tracking",
            get(handlers::list_tracking_events).post(handlers::add_tracking_event),
        )
        .route("/:order_id/invoice", post(handlers::create_invoice_from_order))
}

fn invoice_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_invoices))
        .route("/metrics", get(handlers::get_invoice_metrics))
        .route("/:invoice_id", get(handlers::get_invoice))
        .route("/:invoice_id/status", put(handlers::update_invoice_status))
        .route("/:invoice_id/payments", post(handlers::record_payment))
}
