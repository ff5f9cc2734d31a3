use actix_web::{middleware, web, App, HttpServer};
use anyhow::{anyhow, Context};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use task_notification_service::{
    auth::JwtValidator,
    handlers, logging, metrics,
    repository::{PgEmailJobQueue, PgNotificationStore, PgUserDirectory},
    services::{build_transport, EmailSettings, EmailWorkerSettings, RetentionSweeper},
    websocket::ConnectionReaper,
    Config, ConnectionRegistry, EmailDeliveryWorker, NotificationService, RealtimeGateway,
};
use tokio::sync::watch;
use tracing::{error, info};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init_tracing();

    info!("Starting task notification service");

    let config = Config::from_env().map_err(|e| anyhow!("Failed to load configuration: {}", e))?;
    info!(env = %config.app.env, port = config.app.port, "Configuration loaded");

    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database.url)
        .await
        .context("Failed to connect to PostgreSQL")?;
    info!(
        max_connections = config.database.max_connections,
        "Database pool initialized"
    );

    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .context("Failed to run database migrations")?;
    info!("Database migrations completed");

    let email_queue = Arc::new(PgEmailJobQueue::new(db_pool.clone()));
    let transport = build_transport(&config.smtp).context("Failed to configure email transport")?;

    let gateway = RealtimeGateway::new(ConnectionRegistry::new());
    let notification_service = Arc::new(NotificationService::new(
        Arc::new(PgNotificationStore::new(db_pool.clone())),
        email_queue.clone(),
        Arc::new(PgUserDirectory::new(db_pool.clone())),
        gateway.clone(),
        EmailSettings {
            base_url: config.app.base_url.clone(),
            ..Default::default()
        },
    ));

    // Background tasks share one shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker = EmailDeliveryWorker::new(
        email_queue,
        transport,
        EmailWorkerSettings::from(&config.email_worker),
    );
    let worker_handle = tokio::spawn(worker.run(shutdown_rx.clone()));

    let sweeper = RetentionSweeper::new(
        notification_service.clone(),
        config.retention.days_to_keep,
        Duration::from_secs(config.retention.sweep_interval_secs),
    );
    let sweeper_handle = tokio::spawn(sweeper.run(shutdown_rx.clone()));

    let reaper = ConnectionReaper::new(
        gateway.clone(),
        config.websocket.reaper_interval(),
        config.websocket.client_timeout(),
    );
    let reaper_handle = tokio::spawn(reaper.run(shutdown_rx));

    let jwt = JwtValidator::new(&config.auth.jwt_secret);
    let ws_config = config.websocket.clone();
    let addr = format!("0.0.0.0:{}", config.app.port);
    info!("Starting HTTP server on {}", addr);

    let server_result = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(notification_service.clone()))
            .app_data(web::Data::new(gateway.clone()))
            .app_data(web::Data::new(jwt.clone()))
            .app_data(web::Data::new(ws_config.clone()))
            .wrap(middleware::Logger::default())
            .wrap(metrics::MetricsMiddleware)
            .route("/health", web::get().to(|| async { "OK" }))
            .route("/metrics", web::get().to(metrics::serve_metrics))
            .configure(handlers::configure)
    })
    .bind(&addr)
    .with_context(|| format!("Failed to bind {}", addr))?
    .run()
    .await;

    info!("HTTP server stopped; shutting down background tasks");
    let _ = shutdown_tx.send(true);

    match worker_handle.await {
        Ok(report) => info!(?report, "Email worker drained"),
        Err(e) => error!(error = %e, "Email worker task failed"),
    }
    if let Err(e) = sweeper_handle.await {
        error!(error = %e, "Retention sweeper task failed");
    }
    if let Err(e) = reaper_handle.await {
        error!(error = %e, "Connection reaper task failed");
    }

    server_result.context("HTTP server error")
}
