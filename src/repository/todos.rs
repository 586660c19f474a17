/// Todo Store
///
/// Per-user todo items. Every read and delete is scoped by owner.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::Mutex;

use crate::error::DatabaseError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Todo {
    pub id: i64,
    pub value: String,
    pub date: DateTime<Utc>,
}

#[async_trait]
pub trait TodoStore: Send + Sync {
    async fn create(
        &self,
        user_id: i64,
        value: &str,
        date: DateTime<Utc>,
    ) -> Result<Todo, DatabaseError>;

    /// Newest first.
    async fn list_for_user(&self, user_id: i64) -> Result<Vec<Todo>, DatabaseError>;

    async fn get_for_user(&self, id: i64, user_id: i64) -> Result<Option<Todo>, DatabaseError>;

    /// Returns `false` when no todo with this ID belongs to the user.
    async fn delete_for_user(&self, id: i64, user_id: i64) -> Result<bool, DatabaseError>;
}

#[derive(Clone)]
pub struct PgTodoStore {
    pool: PgPool,
}

impl PgTodoStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TodoStore for PgTodoStore {
    async fn create(
        &self,
        user_id: i64,
        value: &str,
        date: DateTime<Utc>,
    ) -> Result<Todo, DatabaseError> {
        let todo = sqlx::query_as::<_, Todo>(
            r#"
            INSERT INTO todos (user_id, value, date)
            VALUES ($1, $2, $3)
            RETURNING id, value, date
            "#,
        )
        .bind(user_id)
        .bind(value)
        .bind(date)
        .fetch_one(&self.pool)
        .await?;

        Ok(todo)
    }

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<Todo>, DatabaseError> {
        let todos = sqlx::query_as::<_, Todo>(
            "SELECT id, value, date FROM todos WHERE user_id = $1 ORDER BY id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(todos)
    }

    async fn get_for_user(&self, id: i64, user_id: i64) -> Result<Option<Todo>, DatabaseError> {
        let todo = sqlx::query_as::<_, Todo>(
            "SELECT id, value, date FROM todos WHERE id = $1 AND user_id = $2",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(todo)
    }

    async fn delete_for_user(&self, id: i64, user_id: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM todos WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[derive(Default)]
pub struct InMemoryTodoStore {
    todos: Mutex<Vec<(i64, Todo)>>,
    last_id: AtomicI64,
}

impl InMemoryTodoStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TodoStore for InMemoryTodoStore {
    async fn create(
        &self,
        user_id: i64,
        value: &str,
        date: DateTime<Utc>,
    ) -> Result<Todo, DatabaseError> {
        let todo = Todo {
            id: self.last_id.fetch_add(1, Ordering::SeqCst) + 1,
            value: value.to_string(),
            date,
        };
        self.todos.lock().await.push((user_id, todo.clone()));
        Ok(todo)
    }

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<Todo>, DatabaseError> {
        let todos = self.todos.lock().await;
        let mut owned: Vec<Todo> = todos
            .iter()
            .filter(|(owner, _)| *owner == user_id)
            .map(|(_, todo)| todo.clone())
            .collect();
        owned.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(owned)
    }

    async fn get_for_user(&self, id: i64, user_id: i64) -> Result<Option<Todo>, DatabaseError> {
        let todos = self.todos.lock().await;
        Ok(todos
            .iter()
            .find(|(owner, todo)| *owner == user_id && todo.id == id)
            .map(|(_, todo)| todo.clone()))
    }

    async fn delete_for_user(&self, id: i64, user_id: i64) -> Result<bool, DatabaseError> {
        let mut todos = self.todos.lock().await;
        let before = todos.len();
        todos.retain(|(owner, todo)| !(*owner == user_id && todo.id == id));
        Ok(todos.len() < before)
    }
}
