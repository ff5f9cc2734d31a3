/// WebSocket session actor
///
/// One actor per socket. Registration happens in the HTTP upgrade handler
/// before the actor starts, so connect is always ordered before disconnect.
/// The actor forwards registry pushes to the socket, handles client
/// commands, and runs the heartbeat that stops dead sessions.
use super::gateway::RealtimeGateway;
use super::messages::{ClientCommand, ServerEvent};
use super::registry::ConnectionId;
use actix::{Actor, ActorContext, ActorFutureExt, AsyncContext, StreamHandler, WrapFuture};
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct WsSession {
    user_id: Uuid,
    tenant_id: Uuid,
    connection_id: ConnectionId,
    gateway: RealtimeGateway,
    events: Option<UnboundedReceiver<ServerEvent>>,
    hb: Instant,
    heartbeat_interval: Duration,
    client_timeout: Duration,
}

impl WsSession {
    pub fn new(
        user_id: Uuid,
        tenant_id: Uuid,
        connection_id: ConnectionId,
        gateway: RealtimeGateway,
        events: UnboundedReceiver<ServerEvent>,
        heartbeat_interval: Duration,
        client_timeout: Duration,
    ) -> Self {
        Self {
            user_id,
            tenant_id,
            connection_id,
            gateway,
            events: Some(events),
            hb: Instant::now(),
            heartbeat_interval,
            client_timeout,
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.hb) > act.client_timeout {
                warn!(
                    user_id = %act.user_id,
                    connection_id = %act.connection_id,
                    "WebSocket heartbeat failed, disconnecting"
                );
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    /// Client traffic counts as liveness for both the actor and the registry.
    fn mark_alive(&mut self) {
        self.hb = Instant::now();
        let gateway = self.gateway.clone();
        let connection_id = self.connection_id;
        actix::spawn(async move {
            gateway.heartbeat(connection_id).await;
        });
    }

    fn send_event(ctx: &mut ws::WebsocketContext<Self>, event: &ServerEvent) {
        match event.to_json() {
            Ok(json) => ctx.text(json),
            Err(e) => warn!(error = %e, "Failed to serialize server event"),
        }
    }

    fn handle_command(&mut self, command: ClientCommand, ctx: &mut ws::WebsocketContext<Self>) {
        let name = command.name();
        let gateway = self.gateway.clone();
        let connection_id = self.connection_id;

        let fut = async move {
            match command {
                ClientCommand::JoinTaskGroup { task_id } => {
                    gateway.join_entity_group(connection_id, task_id).await
                }
                ClientCommand::LeaveTaskGroup { task_id } => {
                    gateway.leave_entity_group(connection_id, task_id).await;
                    true
                }
                ClientCommand::Ping => true,
            }
        };

        ctx.spawn(fut.into_actor(self).map(move |ok, _act, ctx| {
            let reply = if ok {
                ServerEvent::ack(name)
            } else {
                ServerEvent::error("NOT_CONNECTED", "Connection is no longer registered")
            };
            Self::send_event(ctx, &reply);
        }));
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(
            user_id = %self.user_id,
            tenant_id = %self.tenant_id,
            connection_id = %self.connection_id,
            "WebSocket session started"
        );

        self.hb(ctx);

        if let Some(events) = self.events.take() {
            let stream = futures::stream::unfold(events, |mut rx| async move {
                rx.recv().await.map(|event| (event, rx))
            });
            ctx.add_stream(stream);
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(
            user_id = %self.user_id,
            connection_id = %self.connection_id,
            "WebSocket session stopped"
        );

        let gateway = self.gateway.clone();
        let (user_id, tenant_id, connection_id) = (self.user_id, self.tenant_id, self.connection_id);
        actix::spawn(async move {
            gateway.on_disconnect(user_id, tenant_id, connection_id).await;
        });
    }
}

/// Events pushed through the registry
impl StreamHandler<ServerEvent> for WsSession {
    fn handle(&mut self, event: ServerEvent, ctx: &mut Self::Context) {
        Self::send_event(ctx, &event);
    }

    fn finished(&mut self, _ctx: &mut Self::Context) {
        // Superseded by a newer session: keep the socket, stop receiving pushes
        debug!(
            user_id = %self.user_id,
            connection_id = %self.connection_id,
            "Push channel closed"
        );
    }
}

/// Frames from the client
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, connection_id = %self.connection_id, "WebSocket protocol error");
                ctx.stop();
                return;
            }
        };

        match msg {
            ws::Message::Ping(bytes) => {
                self.mark_alive();
                ctx.pong(&bytes);
            }
            ws::Message::Pong(_) => {
                self.mark_alive();
            }
            ws::Message::Text(text) => {
                self.mark_alive();
                match ClientCommand::from_json(&text) {
                    Ok(command) => self.handle_command(command, ctx),
                    Err(e) => {
                        debug!(error = %e, "Unrecognized client command");
                        Self::send_event(
                            ctx,
                            &ServerEvent::error("INVALID_COMMAND", "Unrecognized command"),
                        );
                    }
                }
            }
            ws::Message::Binary(_) => {
                Self::send_event(
                    ctx,
                    &ServerEvent::error("UNSUPPORTED", "Binary frames are not supported"),
                );
            }
            ws::Message::Close(reason) => {
                ctx.close(reason);
                ctx.stop();
            }
            ws::Message::Continuation(_) => {
                ctx.stop();
            }
            ws::Message::Nop => {}
        }
    }
}
