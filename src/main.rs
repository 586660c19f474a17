use sqlx::postgres::PgPoolOptions;
use std::net::TcpListener;
use std::sync::Arc;
use todo_api::auth::SystemClock;
use todo_api::configuration::get_configuration;
use todo_api::repository::{PgRefreshSessionStore, PgTodoStore, PgUserStore};
use todo_api::startup::{run, AppState};
use todo_api::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load configuration
    let configuration = match get_configuration() {
        Ok(config) => config,
        Err(e) => {
            init_telemetry("info");
            tracing::error!("Failed to read configuration: {}", e);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Configuration error",
            ));
        }
    };

    // Structured logging
    init_telemetry(&configuration.application.log_level);
    tracing::info!("Configuration loaded successfully");

    // Database connection pool
    let connection_string = configuration.database.connection_string();
    tracing::info!("Attempting to connect to database");

    let pool = PgPoolOptions::new()
        .max_connections(configuration.database.max_connections)
        .connect(&connection_string)
        .await
        .map_err(|e| {
            tracing::error!("Failed to create connection pool: {}", e);
            std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "Database connection error",
            )
        })?;

    tracing::info!("Database connection pool created successfully");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to run migrations: {}", e);
            std::io::Error::new(std::io::ErrorKind::Other, "Migration error")
        })?;

    let state = AppState::new(
        Arc::new(PgUserStore::new(pool.clone())),
        Arc::new(PgRefreshSessionStore::new(pool.clone())),
        Arc::new(PgTodoStore::new(pool)),
        Arc::new(SystemClock),
        &configuration.jwt,
        configuration.cookie.clone(),
        configuration.application.cors_allowed_origin.clone(),
    )
    .map_err(|e| {
        tracing::error!("Failed to initialize authentication: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "Authentication config error")
    })?;

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(&address)?;
    tracing::info!("Server listening on: {}", address);

    let server = run(listener, state)?;
    server.await
}
