use actix_cors::Cors;
use actix_web::dev::Server;
use actix_web::http::header;
use actix_web::{web, App, HttpServer};
use std::net::TcpListener;
use std::sync::Arc;

use crate::auth::{AuthService, Clock};
use crate::configuration::{CookieSettings, JwtSettings};
use crate::error::{AppError, ValidationError};
use crate::logger::LoggerMiddleware;
use crate::middleware::JwtMiddleware;
use crate::repository::{RefreshSessionStore, TodoStore, UserStore};
use crate::routes::{
    create_todo, delete_todo, get_todo, health_check, list_todos, login, logout, refresh,
    register,
};

/// Everything the HTTP layer needs, independent of the storage backend.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub todos: Arc<dyn TodoStore>,
    pub clock: Arc<dyn Clock>,
    pub cookie: CookieSettings,
    pub cors_allowed_origin: String,
}

impl AppState {
    /// # Errors
    /// Returns `AppError::Config` if the JWT settings are unusable
    pub fn new(
        users: Arc<dyn UserStore>,
        refresh_sessions: Arc<dyn RefreshSessionStore>,
        todos: Arc<dyn TodoStore>,
        clock: Arc<dyn Clock>,
        jwt: &JwtSettings,
        cookie: CookieSettings,
        cors_allowed_origin: String,
    ) -> Result<Self, AppError> {
        let auth = AuthService::new(users, refresh_sessions, jwt, clock.clone())?;

        Ok(Self {
            auth: Arc::new(auth),
            todos,
            clock,
            cookie,
            cors_allowed_origin,
        })
    }
}

pub fn run(listener: TcpListener, state: AppState) -> Result<Server, std::io::Error> {
    let signer = state.auth.signer();
    let auth = web::Data::from(state.auth);
    let todos: web::Data<dyn TodoStore> = web::Data::from(state.todos);
    let clock: web::Data<dyn Clock> = web::Data::from(state.clock);
    let cookie = web::Data::new(state.cookie);
    let cors_allowed_origin = state.cors_allowed_origin;

    let server = HttpServer::new(move || {
        App::new()
            // Global middleware
            .wrap(cors(&cors_allowed_origin))
            .wrap(LoggerMiddleware)

            // Shared state
            .app_data(auth.clone())
            .app_data(todos.clone())
            .app_data(clock.clone())
            .app_data(cookie.clone())
            .app_data(json_config())

            .route("/health", web::get().to(health_check))
            .service(
                web::scope("/api")
                    // Public routes (no authentication required)
                    .service(
                        web::scope("/auth")
                            .route("/register", web::post().to(register))
                            .route("/login", web::post().to(login))
                            .route("/refresh", web::post().to(refresh))
                            .route("/logout", web::post().to(logout)),
                    )
                    // Protected routes (require JWT authentication)
                    .service(
                        web::scope("/todos")
                            .wrap(JwtMiddleware::new(signer.clone()))
                            .route("", web::get().to(list_todos))
                            .route("", web::post().to(create_todo))
                            .route("/{id}", web::get().to(get_todo))
                            .route("/{id}", web::delete().to(delete_todo)),
                    ),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}

/// Single browser origin, with credentials for the refresh cookie.
/// Other origins are served without CORS headers rather than rejected.
fn cors(allowed_origin: &str) -> Cors {
    Cors::default()
        .allowed_origin(allowed_origin)
        .allowed_methods(["GET", "POST", "DELETE", "OPTIONS"])
        .allowed_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .supports_credentials()
        .max_age(600)
        .block_on_origin_mismatch(false)
}

/// Malformed JSON bodies are reported like any other validation error.
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        tracing::debug!(error = %err, "Rejected request body");
        AppError::Validation(ValidationError::InvalidFormat("request body".to_string())).into()
    })
}
