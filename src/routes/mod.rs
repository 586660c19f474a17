mod auth;
mod health_check;
mod todos;

pub use auth::{login, logout, refresh, register, AuthResponse, CredentialsRequest, UserResponse};
pub use health_check::health_check;
pub use todos::{create_todo, delete_todo, get_todo, list_todos, CreateTodoRequest};
