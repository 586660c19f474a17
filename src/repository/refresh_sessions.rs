/// Refresh Session Store
///
/// Persistence for refresh-token sessions. A session row holds only the hash
/// of its token. Rows sharing a `family_id` form one rotation chain whose only
/// active row is the leaf.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::DatabaseError;

/// A persisted refresh session
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RefreshSession {
    pub id: i64,
    pub user_id: i64,
    pub token_hash: String,
    pub family_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoke_reason: Option<String>,
    pub replaced_by_session_id: Option<i64>,
}

impl RefreshSession {
    /// Active means: not revoked, not consumed, not superseded and not yet expired.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none()
            && self.consumed_at.is_none()
            && self.replaced_by_session_id.is_none()
            && self.expires_at > now
    }
}

/// Row to insert for a new session
#[derive(Debug, Clone)]
pub struct NewRefreshSession {
    pub user_id: i64,
    pub token_hash: String,
    pub family_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait RefreshSessionStore: Send + Sync {
    async fn create_session(
        &self,
        session: NewRefreshSession,
    ) -> Result<RefreshSession, DatabaseError>;

    async fn find_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshSession>, DatabaseError>;

    /// Atomically insert `successor` and mark `old_session_id` consumed and
    /// replaced by it.
    ///
    /// The old row is only updated while it is still active as of
    /// `successor.issued_at`. If it is not, nothing is written and `Ok(None)`
    /// is returned, so that of several concurrent rotations of one session at
    /// most one succeeds.
    async fn rotate_session(
        &self,
        old_session_id: i64,
        successor: NewRefreshSession,
    ) -> Result<Option<RefreshSession>, DatabaseError>;

    /// Revoke every not-yet-revoked session of a family. Returns the number of rows changed.
    async fn revoke_family(
        &self,
        family_id: Uuid,
        reason: &str,
        revoked_at: DateTime<Utc>,
    ) -> Result<u64, DatabaseError>;

    /// Revoke the session with this hash unless it is already revoked.
    async fn revoke_by_token_hash(
        &self,
        token_hash: &str,
        reason: &str,
        revoked_at: DateTime<Utc>,
    ) -> Result<u64, DatabaseError>;

    /// All sessions of a family, oldest first.
    async fn find_family(&self, family_id: Uuid) -> Result<Vec<RefreshSession>, DatabaseError>;
}

const SESSION_COLUMNS: &str = "id, user_id, token_hash, family_id, issued_at, expires_at, \
     consumed_at, revoked_at, revoke_reason, replaced_by_session_id";

/// Postgres-backed store over `auth_refresh_sessions`
#[derive(Clone)]
pub struct PgRefreshSessionStore {
    pool: PgPool,
}

impl PgRefreshSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshSessionStore for PgRefreshSessionStore {
    async fn create_session(
        &self,
        session: NewRefreshSession,
    ) -> Result<RefreshSession, DatabaseError> {
        let query = format!(
            r#"
            INSERT INTO auth_refresh_sessions (user_id, token_hash, family_id, issued_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            SESSION_COLUMNS
        );

        let created = sqlx::query_as::<_, RefreshSession>(&query)
            .bind(session.user_id)
            .bind(&session.token_hash)
            .bind(session.family_id)
            .bind(session.issued_at)
            .bind(session.expires_at)
            .fetch_one(&self.pool)
            .await?;

        Ok(created)
    }

    async fn find_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshSession>, DatabaseError> {
        let query = format!(
            "SELECT {} FROM auth_refresh_sessions WHERE token_hash = $1",
            SESSION_COLUMNS
        );

        let session = sqlx::query_as::<_, RefreshSession>(&query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?;

        Ok(session)
    }

    async fn rotate_session(
        &self,
        old_session_id: i64,
        successor: NewRefreshSession,
    ) -> Result<Option<RefreshSession>, DatabaseError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DatabaseError::Transaction(format!("begin rotation: {}", e)))?;

        let insert = format!(
            r#"
            INSERT INTO auth_refresh_sessions (user_id, token_hash, family_id, issued_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            SESSION_COLUMNS
        );
        let created = sqlx::query_as::<_, RefreshSession>(&insert)
            .bind(successor.user_id)
            .bind(&successor.token_hash)
            .bind(successor.family_id)
            .bind(successor.issued_at)
            .bind(successor.expires_at)
            .fetch_one(&mut tx)
            .await?;

        // A concurrent rotation holding the row lock makes this wait; once it
        // commits the predicate no longer matches and zero rows are updated.
        let consumed = sqlx::query(
            r#"
            UPDATE auth_refresh_sessions
            SET consumed_at = $3, replaced_by_session_id = $2, updated_at = $3
            WHERE id = $1
              AND consumed_at IS NULL
              AND revoked_at IS NULL
              AND replaced_by_session_id IS NULL
              AND expires_at > $3
            "#,
        )
        .bind(old_session_id)
        .bind(created.id)
        .bind(successor.issued_at)
        .execute(&mut tx)
        .await?;

        if consumed.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| DatabaseError::Transaction(format!("rollback rotation: {}", e)))?;
            return Ok(None);
        }

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Transaction(format!("commit rotation: {}", e)))?;

        Ok(Some(created))
    }

    async fn revoke_family(
        &self,
        family_id: Uuid,
        reason: &str,
        revoked_at: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE auth_refresh_sessions
            SET revoked_at = $3, revoke_reason = $2, updated_at = $3
            WHERE family_id = $1 AND revoked_at IS NULL
            "#,
        )
        .bind(family_id)
        .bind(reason)
        .bind(revoked_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn revoke_by_token_hash(
        &self,
        token_hash: &str,
        reason: &str,
        revoked_at: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE auth_refresh_sessions
            SET revoked_at = $3, revoke_reason = $2, updated_at = $3
            WHERE token_hash = $1 AND revoked_at IS NULL
            "#,
        )
        .bind(token_hash)
        .bind(reason)
        .bind(revoked_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn find_family(&self, family_id: Uuid) -> Result<Vec<RefreshSession>, DatabaseError> {
        let query = format!(
            "SELECT {} FROM auth_refresh_sessions WHERE family_id = $1 ORDER BY id",
            SESSION_COLUMNS
        );

        let sessions = sqlx::query_as::<_, RefreshSession>(&query)
            .bind(family_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(sessions)
    }
}

/// In-process store used by tests and local runs without Postgres
#[derive(Default)]
pub struct InMemoryRefreshSessionStore {
    sessions: Mutex<Vec<RefreshSession>>,
    fail_rotations: AtomicBool,
    fail_revocations: AtomicBool,
}

impl InMemoryRefreshSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `rotate_session` fail as if the transaction aborted.
    pub fn fail_rotations(&self, fail: bool) {
        self.fail_rotations.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent revocation fail without touching any row.
    pub fn fail_revocations(&self, fail: bool) {
        self.fail_revocations.store(fail, Ordering::SeqCst);
    }

    fn check_revocations(&self) -> Result<(), DatabaseError> {
        if self.fail_revocations.load(Ordering::SeqCst) {
            return Err(DatabaseError::UnexpectedError(
                "revocation aborted".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn all_sessions(&self) -> Vec<RefreshSession> {
        self.sessions.lock().await.clone()
    }

    fn insert(
        sessions: &mut Vec<RefreshSession>,
        session: NewRefreshSession,
    ) -> Result<RefreshSession, DatabaseError> {
        if sessions.iter().any(|s| s.token_hash == session.token_hash) {
            return Err(DatabaseError::UniqueConstraintViolation(
                "auth_refresh_sessions.token_hash".to_string(),
            ));
        }

        let id = sessions.iter().map(|s| s.id).max().unwrap_or(0) + 1;
        let created = RefreshSession {
            id,
            user_id: session.user_id,
            token_hash: session.token_hash,
            family_id: session.family_id,
            issued_at: session.issued_at,
            expires_at: session.expires_at,
            consumed_at: None,
            revoked_at: None,
            revoke_reason: None,
            replaced_by_session_id: None,
        };
        sessions.push(created.clone());
        Ok(created)
    }

    fn revoke_matching(
        sessions: &mut [RefreshSession],
        reason: &str,
        revoked_at: DateTime<Utc>,
        matches: impl Fn(&RefreshSession) -> bool,
    ) -> u64 {
        let mut changed = 0;
        for session in sessions
            .iter_mut()
            .filter(|s| s.revoked_at.is_none() && matches(s))
        {
            session.revoked_at = Some(revoked_at);
            session.revoke_reason = Some(reason.to_string());
            changed += 1;
        }
        changed
    }
}

#[async_trait]
impl RefreshSessionStore for InMemoryRefreshSessionStore {
    async fn create_session(
        &self,
        session: NewRefreshSession,
    ) -> Result<RefreshSession, DatabaseError> {
        let mut sessions = self.sessions.lock().await;
        Self::insert(&mut sessions, session)
    }

    async fn find_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshSession>, DatabaseError> {
        let sessions = self.sessions.lock().await;
        Ok(sessions.iter().find(|s| s.token_hash == token_hash).cloned())
    }

    async fn rotate_session(
        &self,
        old_session_id: i64,
        successor: NewRefreshSession,
    ) -> Result<Option<RefreshSession>, DatabaseError> {
        if self.fail_rotations.load(Ordering::SeqCst) {
            return Err(DatabaseError::Transaction(
                "rotation aborted".to_string(),
            ));
        }

        // Holding the lock for the whole check-and-write gives the same
        // all-or-nothing result as the Postgres transaction.
        let mut sessions = self.sessions.lock().await;
        let now = successor.issued_at;

        let still_active = sessions
            .iter()
            .any(|s| s.id == old_session_id && s.is_active(now));
        if !still_active {
            return Ok(None);
        }

        let created = Self::insert(&mut sessions, successor)?;
        if let Some(old) = sessions.iter_mut().find(|s| s.id == old_session_id) {
            old.consumed_at = Some(now);
            old.replaced_by_session_id = Some(created.id);
        }

        Ok(Some(created))
    }

    async fn revoke_family(
        &self,
        family_id: Uuid,
        reason: &str,
        revoked_at: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        self.check_revocations()?;
        let mut sessions = self.sessions.lock().await;
        Ok(Self::revoke_matching(&mut sessions, reason, revoked_at, |s| {
            s.family_id == family_id
        }))
    }

    async fn revoke_by_token_hash(
        &self,
        token_hash: &str,
        reason: &str,
        revoked_at: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        self.check_revocations()?;
        let mut sessions = self.sessions.lock().await;
        Ok(Self::revoke_matching(&mut sessions, reason, revoked_at, |s| {
            s.token_hash == token_hash
        }))
    }

    async fn find_family(&self, family_id: Uuid) -> Result<Vec<RefreshSession>, DatabaseError> {
        let sessions = self.sessions.lock().await;
        Ok(sessions
            .iter()
            .filter(|s| s.family_id == family_id)
            .cloned()
            .collect())
    }
}
