/// HTTP handlers for notification service API
pub mod notifications;
pub mod tasks;
pub mod websocket;

pub use notifications::{register_routes as register_notifications, ApiResponse};
pub use tasks::register_routes as register_tasks;
pub use websocket::register_routes as register_websocket;

use actix_web::web;

/// All API routes. `/health` and `/metrics` are mounted by the binary.
pub fn configure(cfg: &mut web::ServiceConfig) {
    register_notifications(cfg);
    register_tasks(cfg);
    register_websocket(cfg);
}
