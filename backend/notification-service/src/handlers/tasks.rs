/// Task update fan-out
use super::notifications::ApiResponse;
use crate::auth::AuthenticatedUser;
use crate::services::NotificationService;
use actix_web::{web, HttpResponse, Result as ActixResult};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// POST /api/v1/tasks/{task_id}/updates
///
/// Pushes the JSON body as a `ReceiveTaskUpdate` to every socket in the
/// caller's tenant watching the task. Nothing is persisted.
pub async fn publish_task_update(
    service: web::Data<Arc<NotificationService>>,
    caller: AuthenticatedUser,
    path: web::Path<Uuid>,
    body: web::Json<serde_json::Value>,
) -> ActixResult<HttpResponse> {
    let task_id = path.into_inner();
    let delivered = service
        .broadcast_task_update_in_tenant(caller.tenant_id, task_id, body.into_inner())
        .await;

    Ok(HttpResponse::Accepted().json(ApiResponse::ok(json!({
        "task_id": task_id,
        "delivered": delivered,
    }))))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1/tasks").route("/{task_id}/updates", web::post().to(publish_task_update)),
    );
}
