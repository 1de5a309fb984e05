use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::net::TcpListener;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing_actix_web::TracingLogger;

use crate::config::{DatabaseSettings, Settings};
use crate::dispatch::{run_launcher, RunDrain, RunLauncher};
use crate::engine::Engine;
use crate::mail::{SmtpTransportFactory, TransportFactory};
use crate::routes::{
    handle_delete_subscriber, handle_dispatch_newsletter, handle_import_subscribers,
    handle_list_deliveries, handle_list_subscribers, handle_mark_delivery_seen,
    handle_update_subscriber_status, health_check,
};
use crate::storage::{PgStore, Store};

pub struct Application {
    port: u16,
    server: Server,
    runs: RunDrain,
}

impl Application {
    /// Production wiring: Postgres storage and per-owner SMTP transports.
    pub async fn build(config: Settings) -> Result<Self, std::io::Error> {
        let store = Arc::new(PgStore::new(get_connection_db_pool(&config.database)));
        let transports = Arc::new(SmtpTransportFactory::new(config.dispatch.smtp_timeout()));

        Self::build_with(config, store, transports)
    }

    pub fn build_with<S: Store + 'static>(
        config: Settings,
        store: Arc<S>,
        transports: Arc<dyn TransportFactory>,
    ) -> Result<Self, std::io::Error> {
        let engine = Engine::new(store, transports, &config.dispatch);
        let listener = TcpListener::bind(config.get_address())?;
        let port = listener.local_addr()?.port();
        // Runs go to the runtime building the app, not to the HTTP worker threads.
        let runtime = Handle::try_current()
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))?;
        let (launcher, runs) = run_launcher(runtime);
        let server = run(listener, engine, launcher)?;

        Ok(Self { port, server, runs })
    }

    pub fn get_port(&self) -> u16 {
        self.port
    }

    /// Serves until SIGINT or SIGTERM. Dispatch runs are cancelled first and drained while
    /// the server still answers, so in-flight sends finish and their callers get a summary.
    pub async fn run_until_stop(self) -> Result<(), std::io::Error> {
        let Application { server, runs, .. } = self;
        let handle = server.handle();
        tokio::pin!(server);

        tokio::select! {
            result = &mut server => {
                runs.drain().await;
                return result;
            }
            _ = shutdown_signal() => {}
        }

        tracing::info!("Shutdown requested; letting dispatch runs finish their in-flight sends");
        runs.drain().await;
        handle.stop(true).await;

        server.await
    }
}

async fn shutdown_signal() {
    let interrupt = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error.cause_chain = ?err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(err) => {
                tracing::error!(error.cause_chain = ?err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
}

pub fn run(
    listener: TcpListener,
    engine: Engine,
    runs: RunLauncher,
) -> Result<Server, std::io::Error> {
    let engine = web::Data::new(engine);
    let runs = web::Data::new(runs);

    let server = HttpServer::new(move || {
        App::new()
            // Request logger with a request id per span
            .wrap(TracingLogger::default())
            .route("/health_check", web::get().to(health_check))
            .route(
                "/newsletter-types/{id}/subscribers/import",
                web::post().to(handle_import_subscribers),
            )
            .route(
                "/newsletter-types/{id}/dispatch",
                web::post().to(handle_dispatch_newsletter),
            )
            .route("/subscribers", web::get().to(handle_list_subscribers))
            .route(
                "/subscribers/{id}/status",
                web::put().to(handle_update_subscriber_status),
            )
            .route("/subscribers/{id}", web::delete().to(handle_delete_subscriber))
            .route("/deliveries", web::get().to(handle_list_deliveries))
            .route(
                "/deliveries/{id}/seen",
                web::post().to(handle_mark_delivery_seen),
            )
            .app_data(engine.clone())
            .app_data(runs.clone())
    })
    // Signals are handled by `Application::run_until_stop`, which drains dispatch runs first.
    .disable_signals()
    .listen(listener)?
    .run();

    Ok(server)
}

pub fn get_connection_db_pool(config: &DatabaseSettings) -> Pool<Postgres> {
    PgPoolOptions::new()
        .acquire_timeout(std::time::Duration::from_secs(2))
        .connect_lazy_with(config.get_db_options())
}
