/// Todo Routes
///
/// CRUD over the authenticated user's todo items. Every handler runs behind
/// `JwtMiddleware`, which provides the caller's `Claims`.

use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::auth::{Claims, Clock};
use crate::error::{AppError, DatabaseError, ValidationError};
use crate::repository::TodoStore;
use crate::validators::is_valid_todo_value;

#[derive(Deserialize)]
pub struct CreateTodoRequest {
    #[serde(default)]
    pub value: String,
}

/// GET /api/todos
///
/// List the caller's todos, newest first.
pub async fn list_todos(
    claims: web::ReqData<Claims>,
    store: web::Data<dyn TodoStore>,
) -> Result<HttpResponse, AppError> {
    let todos = store.list_for_user(claims.user_id).await?;
    Ok(HttpResponse::Ok().json(todos))
}

/// POST /api/todos
///
/// # Errors
/// - 400: Missing or empty `value`
pub async fn create_todo(
    claims: web::ReqData<Claims>,
    form: web::Json<CreateTodoRequest>,
    store: web::Data<dyn TodoStore>,
    clock: web::Data<dyn Clock>,
) -> Result<HttpResponse, AppError> {
    let value = is_valid_todo_value(&form.value)?;

    let todo = store.create(claims.user_id, &value, clock.now()).await?;

    tracing::info!(user_id = claims.user_id, todo_id = todo.id, "Todo created");
    Ok(HttpResponse::Created().json(todo))
}

/// GET /api/todos/{id}
///
/// # Errors
/// - 400: Non-numeric ID
/// - 404: No such todo for this user
pub async fn get_todo(
    claims: web::ReqData<Claims>,
    path: web::Path<String>,
    store: web::Data<dyn TodoStore>,
) -> Result<HttpResponse, AppError> {
    let id = parse_todo_id(&path)?;

    let todo = store
        .get_for_user(id, claims.user_id)
        .await?
        .ok_or_else(|| DatabaseError::NotFound(format!("todo {}", id)))?;

    Ok(HttpResponse::Ok().json(todo))
}

/// DELETE /api/todos/{id}
///
/// # Errors
/// - 400: Non-numeric ID
/// - 404: No such todo for this user
pub async fn delete_todo(
    claims: web::ReqData<Claims>,
    path: web::Path<String>,
    store: web::Data<dyn TodoStore>,
) -> Result<HttpResponse, AppError> {
    let id = parse_todo_id(&path)?;

    if !store.delete_for_user(id, claims.user_id).await? {
        return Err(DatabaseError::NotFound(format!("todo {}", id)).into());
    }

    tracing::info!(user_id = claims.user_id, todo_id = id, "Todo deleted");
    Ok(HttpResponse::NoContent().finish())
}

fn parse_todo_id(raw: &str) -> Result<i64, ValidationError> {
    raw.parse::<i64>()
        .map_err(|_| ValidationError::InvalidFormat("todo id".to_string()))
}
