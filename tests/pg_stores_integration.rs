//! Store tests against a real Postgres. Each test gets its own database.

mod common;

use std::sync::Arc;

use chrono::{DateTime, Duration, DurationRound, Utc};
use common::{jwt_settings, spawn_database, REFRESH_TTL};
use sqlx::PgPool;
use todo_api::auth::{ManualClock, SessionManager, TokenSigner, REVOKE_REASON_REUSE};
use todo_api::error::{AppError, AuthError, DatabaseError, ErrorHandler};
use todo_api::repository::{
    NewRefreshSession, PgRefreshSessionStore, PgTodoStore, PgUserStore, RefreshSessionStore,
    TodoStore, User, UserStore,
};
use uuid::Uuid;

/// Postgres keeps microseconds; whole seconds compare cleanly after a round trip.
fn now() -> DateTime<Utc> {
    Utc::now().duration_trunc(Duration::seconds(1)).unwrap()
}

async fn create_user(pool: &PgPool, username: &str) -> User {
    PgUserStore::new(pool.clone())
        .create_user(username, "hash")
        .await
        .expect("Failed to create user")
}

fn new_session(
    user_id: i64,
    token_hash: &str,
    family_id: Uuid,
    issued_at: DateTime<Utc>,
) -> NewRefreshSession {
    NewRefreshSession {
        user_id,
        token_hash: token_hash.to_string(),
        family_id,
        issued_at,
        expires_at: issued_at + Duration::days(7),
    }
}

// --- User Store ---

#[tokio::test]
async fn user_store_creates_and_finds_users() {
    let pool = spawn_database().await;
    let store = PgUserStore::new(pool);

    let created = store.create_user("alice", "hash").await.unwrap();

    let by_name = store.find_by_username("alice").await.unwrap().unwrap();
    let by_id = store.find_by_id(created.id).await.unwrap().unwrap();
    assert_eq!(by_name, created);
    assert_eq!(by_id, created);
    assert!(store.find_by_username("bob").await.unwrap().is_none());
    assert!(store.find_by_id(created.id + 1).await.unwrap().is_none());
}

#[tokio::test]
async fn user_store_rejects_duplicate_usernames() {
    let pool = spawn_database().await;
    let store = PgUserStore::new(pool);
    store.create_user("alice", "hash").await.unwrap();

    let err = store.create_user("alice", "other").await.unwrap_err();

    assert!(matches!(err, DatabaseError::UniqueConstraintViolation(_)));
    let (status, body) = ErrorHandler::error_response(&AppError::from(err), "req");
    assert_eq!(409, status.as_u16());
    assert_eq!(body.message, "Username is already taken");
}

// --- Refresh Session Store ---

#[tokio::test]
async fn session_store_creates_and_finds_by_hash() {
    let pool = spawn_database().await;
    let user = create_user(&pool, "alice").await;
    let store = PgRefreshSessionStore::new(pool);
    let now = now();
    let family = Uuid::new_v4();

    let created = store
        .create_session(new_session(user.id, "h1", family, now))
        .await
        .unwrap();

    let found = store.find_by_token_hash("h1").await.unwrap().unwrap();
    assert_eq!(found, created);
    assert_eq!(found.family_id, family);
    assert_eq!(found.expires_at, now + Duration::days(7));
    assert!(found.is_active(now));
    assert!(store.find_by_token_hash("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn session_store_reports_token_hash_collisions_generically() {
    let pool = spawn_database().await;
    let user = create_user(&pool, "alice").await;
    let store = PgRefreshSessionStore::new(pool);
    let now = now();
    store
        .create_session(new_session(user.id, "h1", Uuid::new_v4(), now))
        .await
        .unwrap();

    let err = store
        .create_session(new_session(user.id, "h1", Uuid::new_v4(), now))
        .await
        .unwrap_err();

    assert!(matches!(err, DatabaseError::UniqueConstraintViolation(_)));
    let (_, body) = ErrorHandler::error_response(&AppError::from(err), "req");
    assert_eq!(body.message, "Resource already exists");
}

#[tokio::test]
async fn session_store_rotation_links_old_to_new() {
    let pool = spawn_database().await;
    let user = create_user(&pool, "alice").await;
    let store = PgRefreshSessionStore::new(pool);
    let now = now();
    let family = Uuid::new_v4();
    let old = store
        .create_session(new_session(user.id, "h1", family, now))
        .await
        .unwrap();

    let rotated_at = now + Duration::seconds(30);
    let new = store
        .rotate_session(old.id, new_session(user.id, "h2", family, rotated_at))
        .await
        .unwrap()
        .expect("Rotation should succeed");

    let old = store.find_by_token_hash("h1").await.unwrap().unwrap();
    assert_eq!(old.consumed_at, Some(rotated_at));
    assert_eq!(old.replaced_by_session_id, Some(new.id));
    assert!(!old.is_active(rotated_at));
    assert!(new.is_active(rotated_at));
    assert_eq!(new.family_id, family);

    // A second rotation of the consumed row writes nothing
    let second = store
        .rotate_session(old.id, new_session(user.id, "h3", family, rotated_at))
        .await
        .unwrap();
    assert!(second.is_none());
    assert!(store.find_by_token_hash("h3").await.unwrap().is_none());
    assert_eq!(store.find_family(family).await.unwrap().len(), 2);
}

#[tokio::test]
async fn session_store_does_not_rotate_expired_or_revoked_rows() {
    let pool = spawn_database().await;
    let user = create_user(&pool, "alice").await;
    let store = PgRefreshSessionStore::new(pool);
    let now = now();

    let expired_family = Uuid::new_v4();
    let expired = store
        .create_session(new_session(user.id, "e1", expired_family, now))
        .await
        .unwrap();
    let after_expiry = expired.expires_at;
    let result = store
        .rotate_session(
            expired.id,
            new_session(user.id, "e2", expired_family, after_expiry),
        )
        .await
        .unwrap();
    assert!(result.is_none());
    assert_eq!(store.find_family(expired_family).await.unwrap().len(), 1);

    let revoked_family = Uuid::new_v4();
    let revoked = store
        .create_session(new_session(user.id, "r1", revoked_family, now))
        .await
        .unwrap();
    store.revoke_by_token_hash("r1", "test", now).await.unwrap();
    let result = store
        .rotate_session(revoked.id, new_session(user.id, "r2", revoked_family, now))
        .await
        .unwrap();
    assert!(result.is_none());
    assert_eq!(store.find_family(revoked_family).await.unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_rotations_have_a_single_winner() {
    let pool = spawn_database().await;
    let user = create_user(&pool, "alice").await;
    let store = Arc::new(PgRefreshSessionStore::new(pool));
    let now = now();
    let family = Uuid::new_v4();
    let old_id = store
        .create_session(new_session(user.id, "h0", family, now))
        .await
        .unwrap()
        .id;

    let handles: Vec<_> = (1..=8)
        .map(|i| {
            let store = store.clone();
            let successor = new_session(user.id, &format!("h{}", i), family, now);
            tokio::spawn(async move { store.rotate_session(old_id, successor).await })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        let result = handle.await.expect("Rotation task panicked");
        if result.expect("Rotation should not error").is_some() {
            winners += 1;
        }
    }

    assert_eq!(winners, 1);
    let family_rows = store.find_family(family).await.unwrap();
    assert_eq!(family_rows.len(), 2);
    assert_eq!(family_rows.iter().filter(|s| s.is_active(now)).count(), 1);
}

#[tokio::test]
async fn session_store_revokes_a_whole_family_once() {
    let pool = spawn_database().await;
    let user = create_user(&pool, "alice").await;
    let store = PgRefreshSessionStore::new(pool);
    let now = now();
    let family = Uuid::new_v4();
    let other = Uuid::new_v4();
    let first = store
        .create_session(new_session(user.id, "a1", family, now))
        .await
        .unwrap();
    store
        .rotate_session(first.id, new_session(user.id, "a2", family, now))
        .await
        .unwrap();
    store
        .create_session(new_session(user.id, "b1", other, now))
        .await
        .unwrap();

    assert_eq!(store.revoke_family(family, "reuse", now).await.unwrap(), 2);
    assert_eq!(store.revoke_family(family, "again", now).await.unwrap(), 0);

    for session in store.find_family(family).await.unwrap() {
        assert_eq!(session.revoked_at, Some(now));
        assert_eq!(session.revoke_reason.as_deref(), Some("reuse"));
    }
    let untouched = store.find_by_token_hash("b1").await.unwrap().unwrap();
    assert!(untouched.revoked_at.is_none());
}

#[tokio::test]
async fn session_store_revoke_by_hash_is_idempotent() {
    let pool = spawn_database().await;
    let user = create_user(&pool, "alice").await;
    let store = PgRefreshSessionStore::new(pool);
    let now = now();
    store
        .create_session(new_session(user.id, "h1", Uuid::new_v4(), now))
        .await
        .unwrap();

    assert_eq!(store.revoke_by_token_hash("h1", "logout", now).await.unwrap(), 1);
    assert_eq!(store.revoke_by_token_hash("h1", "logout", now).await.unwrap(), 0);
    assert_eq!(store.revoke_by_token_hash("nope", "logout", now).await.unwrap(), 0);

    let session = store.find_by_token_hash("h1").await.unwrap().unwrap();
    assert_eq!(session.revoke_reason.as_deref(), Some("logout"));
}

#[tokio::test]
async fn replayed_token_revokes_its_family_in_postgres() {
    let pool = spawn_database().await;
    let user = create_user(&pool, "alice").await;
    let sessions = Arc::new(PgRefreshSessionStore::new(pool.clone()));
    let users = Arc::new(PgUserStore::new(pool));
    let clock = Arc::new(ManualClock::new(now()));
    let signer = Arc::new(TokenSigner::new(&jwt_settings(), clock.clone()).unwrap());
    let manager =
        SessionManager::new(sessions.clone(), users, signer, REFRESH_TTL, clock.clone()).unwrap();

    let issued = manager.issue_new(user.id).await.unwrap();
    clock.advance(Duration::seconds(60));
    let rotated = manager.rotate(&issued.token).await.unwrap();
    assert_eq!(rotated.user.id, user.id);

    let replay = manager.rotate(&issued.token).await;
    assert!(matches!(
        replay,
        Err(AppError::Auth(AuthError::RefreshTokenInactive))
    ));

    let family = sessions
        .find_family(issued.session.family_id)
        .await
        .unwrap();
    assert_eq!(family.len(), 2);
    for session in &family {
        assert!(session.revoked_at.is_some());
        assert_eq!(session.revoke_reason.as_deref(), Some(REVOKE_REASON_REUSE));
    }

    let successor = manager.rotate(&rotated.refresh.token).await;
    assert!(matches!(
        successor,
        Err(AppError::Auth(AuthError::RefreshTokenInactive))
    ));
}

// --- Todo Store ---

#[tokio::test]
async fn todo_store_is_scoped_to_its_owner() {
    let pool = spawn_database().await;
    let alice = create_user(&pool, "alice").await;
    let bob = create_user(&pool, "bob").await;
    let store = PgTodoStore::new(pool);
    let now = now();

    let first = store.create(alice.id, "buy milk", now).await.unwrap();
    let second = store
        .create(alice.id, "walk dog", now + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(first.value, "buy milk");
    assert_eq!(first.date, now);

    let listed = store.list_for_user(alice.id).await.unwrap();
    assert_eq!(listed, vec![second.clone(), first.clone()]);
    assert!(store.list_for_user(bob.id).await.unwrap().is_empty());

    assert_eq!(
        store.get_for_user(first.id, alice.id).await.unwrap(),
        Some(first.clone())
    );
    assert!(store.get_for_user(first.id, bob.id).await.unwrap().is_none());

    assert!(!store.delete_for_user(first.id, bob.id).await.unwrap());
    assert!(store.delete_for_user(first.id, alice.id).await.unwrap());
    assert!(!store.delete_for_user(first.id, alice.id).await.unwrap());
    assert_eq!(store.list_for_user(alice.id).await.unwrap(), vec![second]);
}
