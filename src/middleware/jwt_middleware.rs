/// JWT Authentication Middleware
///
/// Validates access tokens from the Authorization header and injects
/// claims into request extensions for use by route handlers.

use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage, HttpResponse,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;
use std::sync::Arc;

use crate::auth::{Claims, TokenSigner};
use crate::error::{AppError, AuthError, ErrorHandler};

const BEARER_PREFIX: &str = "Bearer ";

/// JWT middleware for protecting routes
///
/// Must be applied to routes that require authentication.
/// Handlers read the verified identity with `web::ReqData<Claims>`.
pub struct JwtMiddleware {
    signer: Arc<TokenSigner>,
}

impl JwtMiddleware {
    pub fn new(signer: Arc<TokenSigner>) -> Self {
        Self { signer }
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = JwtMiddlewareService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(JwtMiddlewareService {
            service: Rc::new(service),
            signer: self.signer.clone(),
        }))
    }
}

pub struct JwtMiddlewareService<S> {
    service: Rc<S>,
    signer: Arc<TokenSigner>,
}

impl<S, B> Service<ServiceRequest> for JwtMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let token = req
            .headers()
            .get("Authorization")
            .and_then(|h| h.to_str().ok())
            .and_then(bearer_token);

        let Some(token) = token else {
            tracing::warn!(path = %req.path(), "Missing or malformed Authorization header");
            let response = req.into_response(unauthorized()).map_into_right_body();
            return Box::pin(async move { Ok(response) });
        };

        match self.signer.verify(&token) {
            Ok(claims) => {
                tracing::debug!(user_id = claims.user_id, "Access token validated");
                req.extensions_mut().insert::<Claims>(claims);

                let service = self.service.clone();
                Box::pin(async move { Ok(service.call(req).await?.map_into_left_body()) })
            }
            Err(e) => {
                tracing::warn!(path = %req.path(), error = %e, "Access token rejected");
                let response = req.into_response(unauthorized()).map_into_right_body();
                Box::pin(async move { Ok(response) })
            }
        }
    }
}

/// Extract the token from a `Bearer <token>` header value.
fn bearer_token(header: &str) -> Option<String> {
    let token = header.trim().strip_prefix(BEARER_PREFIX)?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Returned as a response, not an error: the CORS layer only decorates responses.
fn unauthorized() -> HttpResponse {
    let request_id = uuid::Uuid::new_v4().to_string();
    let error = AppError::from(AuthError::TokenInvalid);
    let (status, body) = <AppError as ErrorHandler>::error_response(&error, &request_id);

    HttpResponse::build(status).json(body)
}
