/// Authentication Routes
///
/// Handles user registration, login, refresh-token rotation and logout.
/// The refresh token travels only in an HTTP-only cookie; the access token
/// is returned in the JSON body.

use actix_web::cookie::{time::OffsetDateTime, Cookie};
use actix_web::{web, HttpRequest, HttpResponse, HttpResponseBuilder};
use serde::{Deserialize, Serialize};

use crate::auth::{AuthOutcome, AuthService};
use crate::configuration::CookieSettings;
use crate::error::{AppError, AuthError, ErrorContext, ErrorHandler};
use crate::repository::User;

/// Credentials for registration and login
#[derive(Deserialize)]
pub struct CredentialsRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Authentication response with the access token and user summary
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: UserResponse,
}

/// Public view of a user
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: i64,
    pub username: String,
    pub created_at: String,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            created_at: user.created_at.to_rfc3339(),
        }
    }
}

/// POST /api/auth/register
///
/// Register a new user and start a session.
///
/// # Errors
/// - 400: Missing or malformed username/password
/// - 409: Username already taken
/// - 500: Internal server error
pub async fn register(
    form: web::Json<CredentialsRequest>,
    auth: web::Data<AuthService>,
    cookie: web::Data<CookieSettings>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_registration");

    let outcome = auth.register(&form.username, &form.password).await?;

    tracing::info!(
        request_id = %context.request_id,
        user_id = outcome.user.id,
        "User registered successfully"
    );

    session_response(HttpResponse::Created(), outcome, &cookie)
}

/// POST /api/auth/login
///
/// # Errors
/// - 400: Missing username or password
/// - 401: Invalid credentials (unknown user or wrong password, indistinguishable)
/// - 500: Internal server error
pub async fn login(
    form: web::Json<CredentialsRequest>,
    auth: web::Data<AuthService>,
    cookie: web::Data<CookieSettings>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_login");

    let outcome = auth.login(&form.username, &form.password).await?;

    tracing::info!(
        request_id = %context.request_id,
        user_id = outcome.user.id,
        "User logged in successfully"
    );

    session_response(HttpResponse::Ok(), outcome, &cookie)
}

/// POST /api/auth/refresh
///
/// Rotate the refresh cookie and issue a new access token.
/// Presenting a cookie that was already rotated revokes its whole family.
///
/// # Errors
/// - 401: Missing, unknown, expired, revoked or reused refresh token
///   (the cookie is cleared unless it was missing)
/// - 500: Internal server error (the cookie stays valid for a retry)
pub async fn refresh(
    req: HttpRequest,
    auth: web::Data<AuthService>,
    cookie: web::Data<CookieSettings>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("token_refresh");

    let token = read_refresh_cookie(&req, &cookie).ok_or(AuthError::MissingToken)?;

    match auth.refresh(&token).await {
        Ok(outcome) => {
            tracing::info!(
                request_id = %context.request_id,
                user_id = outcome.user.id,
                "Token refreshed successfully"
            );
            session_response(HttpResponse::Ok(), outcome, &cookie)
        }
        Err(e) if e.is_auth_failure() => {
            context.log_error(&e);
            let (status, body) = <AppError as ErrorHandler>::error_response(&e, &context.request_id);
            Ok(HttpResponse::build(status)
                .cookie(removal_cookie(&cookie))
                .json(body))
        }
        Err(e) => Err(e),
    }
}

/// POST /api/auth/logout
///
/// Revoke the presented refresh session and clear the cookie.
/// Succeeds without a cookie and with an already-revoked one.
///
/// # Errors
/// - 500: The session store failed
pub async fn logout(
    req: HttpRequest,
    auth: web::Data<AuthService>,
    cookie: web::Data<CookieSettings>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_logout");

    let token = read_refresh_cookie(&req, &cookie);
    if let Err(e) = auth.logout(token.as_deref()).await {
        context.log_error(&e);
        return Err(e);
    }

    Ok(HttpResponse::NoContent()
        .cookie(removal_cookie(&cookie))
        .finish())
}

fn session_response(
    mut builder: HttpResponseBuilder,
    outcome: AuthOutcome,
    settings: &CookieSettings,
) -> Result<HttpResponse, AppError> {
    let expires_at = OffsetDateTime::from_unix_timestamp(
        outcome.refresh.session.expires_at.timestamp(),
    )
    .map_err(|e| AppError::Internal(format!("Invalid cookie expiry: {}", e)))?;

    let refresh_cookie = cookie_builder(settings, outcome.refresh.token)
        .expires(expires_at)
        .finish();

    Ok(builder.cookie(refresh_cookie).json(AuthResponse {
        access_token: outcome.access.token,
        token_type: "Bearer".to_string(),
        expires_in: outcome.access.claims.exp - outcome.access.claims.iat,
        user: UserResponse::from(&outcome.user),
    }))
}

fn cookie_builder(
    settings: &CookieSettings,
    value: String,
) -> actix_web::cookie::CookieBuilder<'static> {
    let mut builder = Cookie::build(settings.name.clone(), value)
        .path(settings.path.clone())
        .http_only(settings.http_only)
        .secure(settings.secure)
        .same_site(settings.same_site_policy());

    if let Some(domain) = settings.domain.as_ref().filter(|d| !d.is_empty()) {
        builder = builder.domain(domain.clone());
    }

    builder
}

/// An empty cookie with the same scope, already expired.
fn removal_cookie(settings: &CookieSettings) -> Cookie<'static> {
    let mut cookie = cookie_builder(settings, String::new()).finish();
    cookie.make_removal();
    cookie
}

fn read_refresh_cookie(req: &HttpRequest, settings: &CookieSettings) -> Option<String> {
    req.cookie(&settings.name)
        .map(|c| c.value().trim().to_string())
        .filter(|value| !value.is_empty())
}
