/// WebSocket upgrade and connection introspection
///
/// The socket itself lives at `GET /ws`; the JSON status endpoints live
/// under `/api/v1/ws` and only ever report on the caller's tenant.
use super::notifications::ApiResponse;
use crate::auth::AuthenticatedUser;
use crate::config::WebSocketConfig;
use crate::websocket::{ConnectionId, RealtimeGateway, WsSession};
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

/// WebSocket frame size limit (256 KB)
const WS_MESSAGE_SIZE_LIMIT: usize = 256_000;

/// GET /ws?token=<jwt>
pub async fn ws_connect(
    req: HttpRequest,
    stream: web::Payload,
    caller: AuthenticatedUser,
    gateway: web::Data<RealtimeGateway>,
    settings: web::Data<WebSocketConfig>,
) -> ActixResult<HttpResponse> {
    let connection_id = ConnectionId::new();
    let (tx, rx) = mpsc::unbounded_channel();

    // Register before the actor exists so disconnect can never overtake it
    gateway
        .on_connect(caller.user_id, caller.tenant_id, connection_id, tx)
        .await;

    let session = WsSession::new(
        caller.user_id,
        caller.tenant_id,
        connection_id,
        gateway.get_ref().clone(),
        rx,
        settings.heartbeat_interval(),
        settings.client_timeout(),
    );

    let response = ws::WsResponseBuilder::new(session, &req, stream)
        .frame_size(WS_MESSAGE_SIZE_LIMIT)
        .start();

    if let Err(e) = &response {
        warn!(user_id = %caller.user_id, error = %e, "WebSocket handshake failed");
        gateway
            .on_disconnect(caller.user_id, caller.tenant_id, connection_id)
            .await;
    }
    response
}

/// GET /api/v1/ws/status/{user_id}
///
/// Users of other tenants always read as disconnected.
pub async fn ws_status(
    path: web::Path<Uuid>,
    caller: AuthenticatedUser,
    gateway: web::Data<RealtimeGateway>,
) -> ActixResult<HttpResponse> {
    let user_id = path.into_inner();
    let registry = gateway.registry();
    let mut connection_id = registry.lookup(user_id).await;
    if let Some(id) = connection_id {
        if registry.tenant_of(id).await != Some(caller.tenant_id) {
            connection_id = None;
        }
    }

    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({
        "user_id": user_id,
        "connected": connection_id.is_some(),
        "connection_id": connection_id,
    }))))
}

/// GET /api/v1/ws/metrics
pub async fn ws_metrics(
    caller: AuthenticatedUser,
    gateway: web::Data<RealtimeGateway>,
) -> ActixResult<HttpResponse> {
    let user_ids = gateway
        .registry()
        .connected_user_ids_in_tenant(caller.tenant_id)
        .await;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({
        "tenant_id": caller.tenant_id,
        "connected_users": user_ids.len(),
        "user_ids": user_ids,
    }))))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/ws", web::get().to(ws_connect)).service(
        web::scope("/api/v1/ws")
            .route("/status/{user_id}", web::get().to(ws_status))
            .route("/metrics", web::get().to(ws_metrics)),
    );
}
