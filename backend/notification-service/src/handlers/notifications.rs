/// Notification CRUD handlers
///
/// Every read and mutation acts on the authenticated caller's notifications
/// only; a notification owned by someone else is reported as not found.
/// Creating one for another user requires that user to share the caller's
/// tenant.
use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::models::{CreateNotification, NotificationPriority, NotificationType};
use crate::services::NotificationService;
use actix_web::{web, HttpResponse, Result as ActixResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Request to create a notification
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CreateNotificationPayload {
    pub user_id: Uuid,
    pub title: String,
    pub message: String,
    pub notification_type: String,
    pub related_entity_id: Option<Uuid>,
    pub related_entity_type: Option<String>,
    pub priority: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<CreateNotificationPayload> for CreateNotification {
    fn from(payload: CreateNotificationPayload) -> Self {
        CreateNotification {
            user_id: payload.user_id,
            title: payload.title,
            message: payload.message,
            notification_type: NotificationType::parse(&payload.notification_type),
            related_entity_id: payload.related_entity_id,
            related_entity_type: payload.related_entity_type,
            priority: payload
                .priority
                .as_deref()
                .map(NotificationPriority::parse)
                .unwrap_or_default(),
            expires_at: payload.expires_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub unread_only: bool,
    pub limit: Option<i64>,
}

/// API Response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

fn not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("notification {}", id))
}

/// POST /api/v1/notifications
pub async fn create_notification(
    service: web::Data<Arc<NotificationService>>,
    caller: AuthenticatedUser,
    req: web::Json<CreateNotificationPayload>,
) -> ActixResult<HttpResponse> {
    let payload = req.into_inner();
    if payload.user_id != caller.user_id
        && !service
            .is_tenant_member(payload.user_id, caller.tenant_id)
            .await?
    {
        warn!(
            caller = %caller.user_id,
            recipient = %payload.user_id,
            "Rejected notification for a user outside the caller's tenant"
        );
        return Err(AppError::Forbidden("recipient is not in your company".to_string()).into());
    }

    let notification = service.create(payload.into()).await?;
    Ok(HttpResponse::Created().json(ApiResponse::ok(notification)))
}

/// GET /api/v1/notifications
pub async fn list_notifications(
    service: web::Data<Arc<NotificationService>>,
    caller: AuthenticatedUser,
    query: web::Query<ListQuery>,
) -> ActixResult<HttpResponse> {
    let notifications = service
        .get_user_notifications(caller.user_id, query.unread_only, query.limit)
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(notifications)))
}

/// GET /api/v1/notifications/unread-count
pub async fn unread_count(
    service: web::Data<Arc<NotificationService>>,
    caller: AuthenticatedUser,
) -> ActixResult<HttpResponse> {
    let count = service.get_unread_count(caller.user_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({ "unread_count": count }))))
}

/// GET /api/v1/notifications/{id}
pub async fn get_notification(
    service: web::Data<Arc<NotificationService>>,
    caller: AuthenticatedUser,
    path: web::Path<Uuid>,
) -> ActixResult<HttpResponse> {
    let id = path.into_inner();
    let notification = service
        .get_notification(id, caller.user_id)
        .await?
        .ok_or_else(|| not_found(id))?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(notification)))
}

/// PUT /api/v1/notifications/{id}/read
pub async fn mark_as_read(
    service: web::Data<Arc<NotificationService>>,
    caller: AuthenticatedUser,
    path: web::Path<Uuid>,
) -> ActixResult<HttpResponse> {
    let id = path.into_inner();
    if !service.mark_as_read(id, caller.user_id).await? {
        return Err(not_found(id).into());
    }
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({ "id": id, "is_read": true }))))
}

/// PUT /api/v1/notifications/read-all
pub async fn mark_all_as_read(
    service: web::Data<Arc<NotificationService>>,
    caller: AuthenticatedUser,
) -> ActixResult<HttpResponse> {
    let updated = service.mark_all_as_read(caller.user_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({ "updated": updated }))))
}

/// DELETE /api/v1/notifications/{id}
pub async fn delete_notification(
    service: web::Data<Arc<NotificationService>>,
    caller: AuthenticatedUser,
    path: web::Path<Uuid>,
) -> ActixResult<HttpResponse> {
    let id = path.into_inner();
    if !service.delete(id, caller.user_id).await? {
        return Err(not_found(id).into());
    }
    Ok(HttpResponse::NoContent().finish())
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    // Literal segments before `/{id}`
    cfg.service(
        web::scope("/api/v1/notifications")
            .route("", web::get().to(list_notifications))
            .route("", web::post().to(create_notification))
            .route("/unread-count", web::get().to(unread_count))
            .route("/read-all", web::put().to(mark_all_as_read))
            .route("/{id}", web::get().to(get_notification))
            .route("/{id}", web::delete().to(delete_notification))
            .route("/{id}/read", web::put().to(mark_as_read)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_defaults() {
        let payload: CreateNotificationPayload = serde_json::from_value(json!({
            "user_id": Uuid::new_v4(),
            "title": "Task Assigned",
            "message": "You have a task",
            "notification_type": "task_assigned"
        }))
        .unwrap();

        let create: CreateNotification = payload.into();
        assert_eq!(create.notification_type, NotificationType::Assignment);
        assert_eq!(create.priority, NotificationPriority::Normal);
        assert!(create.related_entity_id.is_none());
    }
}
