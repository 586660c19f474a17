/// Persistence layer
///
/// Each store is a capability trait with a Postgres implementation and an
/// in-memory implementation.

mod refresh_sessions;
mod todos;
mod users;

pub use refresh_sessions::{
    InMemoryRefreshSessionStore, NewRefreshSession, PgRefreshSessionStore, RefreshSession,
    RefreshSessionStore,
};
pub use todos::{InMemoryTodoStore, PgTodoStore, Todo, TodoStore};
pub use users::{InMemoryUserStore, PgUserStore, User, UserStore};
