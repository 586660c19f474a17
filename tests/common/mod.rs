//! Shared helpers for the integration tests: a real server on a random
//! port, wired to in-memory stores and a manual clock, and a throwaway
//! Postgres database for the store tests.

#![allow(dead_code)]

use std::net::TcpListener;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use sqlx::{Connection, Executor, PgConnection, PgPool};
use todo_api::auth::ManualClock;
use todo_api::configuration::{get_configuration, CookieSettings, DatabaseSettings, JwtSettings};
use todo_api::repository::{InMemoryRefreshSessionStore, InMemoryTodoStore, InMemoryUserStore};
use todo_api::startup::{run, AppState};

pub const COOKIE_NAME: &str = "todo_refresh_token";
pub const ACCESS_TTL: i64 = 900;
pub const REFRESH_TTL: i64 = 7 * 24 * 3600;
pub const ALLOWED_ORIGIN: &str = "http://localhost:5173";

pub struct TestApp {
    pub address: String,
    pub users: Arc<InMemoryUserStore>,
    pub sessions: Arc<InMemoryRefreshSessionStore>,
    pub todos: Arc<InMemoryTodoStore>,
    pub clock: Arc<ManualClock>,
    pub client: reqwest::Client,
}

pub fn jwt_settings() -> JwtSettings {
    JwtSettings {
        secret: "integration-test-secret".to_string(),
        access_token_expiry: ACCESS_TTL,
        refresh_token_expiry: REFRESH_TTL,
        bcrypt_cost: 4,
    }
}

pub async fn spawn_app() -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    let users = Arc::new(InMemoryUserStore::new());
    let sessions = Arc::new(InMemoryRefreshSessionStore::new());
    let todos = Arc::new(InMemoryTodoStore::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));

    let state = AppState::new(
        users.clone(),
        sessions.clone(),
        todos.clone(),
        clock.clone(),
        &jwt_settings(),
        CookieSettings::default(),
        ALLOWED_ORIGIN.to_string(),
    )
    .expect("Failed to build application state");

    let server = run(listener, state).expect("Failed to bind address");
    let _ = tokio::spawn(server);

    TestApp {
        address,
        users,
        sessions,
        todos,
        clock,
        client: reqwest::Client::new(),
    }
}

/// A freshly migrated database with a random name.
pub async fn spawn_database() -> PgPool {
    let mut configuration = get_configuration().expect("Failed to read configuration.");
    configuration.database.database_name = uuid::Uuid::new_v4().to_string();
    configure_database(&configuration.database).await
}

pub async fn configure_database(config: &DatabaseSettings) -> PgPool {
    // Create database
    let mut connection = PgConnection::connect(&config.connection_string_without_db())
        .await
        .expect("Failed to connect to Postgres");
    connection
        .execute(&*format!(r#"CREATE DATABASE "{}";"#, config.database_name))
        .await
        .expect("Failed to create database.");
    // Migrate database
    let connection_pool = PgPool::connect(&config.connection_string())
        .await
        .expect("Failed to connect to Postgres.");
    sqlx::migrate!("./migrations")
        .run(&connection_pool)
        .await
        .expect("Failed to migrate the database.");
    connection_pool
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    pub async fn post_credentials(&self, path: &str, username: &str, password: &str) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn register(&self, username: &str, password: &str) -> reqwest::Response {
        self.post_credentials("/api/auth/register", username, password)
            .await
    }

    pub async fn login(&self, username: &str, password: &str) -> reqwest::Response {
        self.post_credentials("/api/auth/login", username, password)
            .await
    }

    /// POST to an auth endpoint presenting `refresh_token` as the cookie.
    pub async fn post_with_cookie(&self, path: &str, refresh_token: Option<&str>) -> reqwest::Response {
        let mut request = self.client.post(self.url(path));
        if let Some(token) = refresh_token {
            request = request.header("Cookie", format!("{}={}", COOKIE_NAME, token));
        }
        request.send().await.expect("Failed to execute request.")
    }

    pub async fn refresh(&self, refresh_token: Option<&str>) -> reqwest::Response {
        self.post_with_cookie("/api/auth/refresh", refresh_token).await
    }

    pub async fn logout(&self, refresh_token: Option<&str>) -> reqwest::Response {
        self.post_with_cookie("/api/auth/logout", refresh_token).await
    }

    /// Register a user and return (access token, refresh token).
    pub async fn signed_up(&self, username: &str, password: &str) -> (String, String) {
        let response = self.register(username, password).await;
        assert_eq!(201, response.status().as_u16());

        let refresh_token = refresh_cookie(&response).expect("No refresh cookie set");
        let body: Value = response.json().await.expect("Failed to parse response");
        let access_token = body["accessToken"].as_str().unwrap().to_string();

        (access_token, refresh_token)
    }
}

/// The raw `Set-Cookie` header for the refresh cookie, if present.
pub fn refresh_set_cookie(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| value.starts_with(&format!("{}=", COOKIE_NAME)))
        .map(str::to_string)
}

/// The value of the refresh cookie set by a response, if any.
pub fn refresh_cookie(response: &reqwest::Response) -> Option<String> {
    let header = refresh_set_cookie(response)?;
    let pair = header.split(';').next()?;
    let value = pair.split_once('=')?.1;
    Some(value.to_string())
}
