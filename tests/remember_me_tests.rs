mod helpers;

use chrono::Utc;
use helpers::{backdate_persistent_login, TestDb, UserBuilder};
use rolegate::access::types::Role;
use rolegate::remember_me::{RememberMeError, TokenRepository};
use rolegate::storage::{self, DbRememberMeService};

const VALIDITY: i64 = 3600;

fn service(db: &TestDb) -> DbRememberMeService {
    DbRememberMeService::new(db.connection().clone(), db.connection().clone(), VALIDITY)
}

#[tokio::test]
async fn test_issue_then_validate_rotates_token() {
    let db = TestDb::new().await;
    let user = UserBuilder::new("bill")
        .with_role(Role::User)
        .create(db.connection())
        .await;
    let svc = service(&db);

    let issued = svc.issue(&user.subject).await.unwrap();
    let login = svc
        .validate(&issued.series, &issued.token_value)
        .await
        .expect("fresh token must validate");

    assert_eq!(login.identity.user_id, user.subject);
    assert_eq!(login.identity.username, "bill");
    assert!(login.identity.has_role(Role::User));
    assert_eq!(login.token.series, issued.series);
    assert_ne!(login.token.token_value, issued.token_value);

    let stored = storage::get_persistent_login(db.connection(), &issued.series)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.token_value, login.token.token_value);

    // The rotated value keeps working
    let again = svc
        .validate(&login.token.series, &login.token.token_value)
        .await
        .unwrap();
    assert_ne!(again.token.token_value, login.token.token_value);
}

#[tokio::test]
async fn test_each_issue_starts_a_new_series() {
    let db = TestDb::new().await;
    let user = UserBuilder::new("sam")
        .with_role(Role::Dba)
        .create(db.connection())
        .await;
    let svc = service(&db);

    let a = svc.issue(&user.subject).await.unwrap();
    let b = svc.issue(&user.subject).await.unwrap();
    assert_ne!(a.series, b.series);
    assert_ne!(a.token_value, b.token_value);
}

#[tokio::test]
async fn test_replayed_token_purges_series() {
    let db = TestDb::new().await;
    let user = UserBuilder::new("nicole")
        .with_role(Role::Admin)
        .create(db.connection())
        .await;
    let svc = service(&db);

    let issued = svc.issue(&user.subject).await.unwrap();
    let rotated = svc
        .validate(&issued.series, &issued.token_value)
        .await
        .unwrap();

    // An attacker replays the copied pre-rotation cookie
    let err = svc
        .validate(&issued.series, &issued.token_value)
        .await
        .unwrap_err();
    match err {
        RememberMeError::TheftSuspected { series, user_id } => {
            assert_eq!(series, issued.series);
            assert_eq!(user_id, user.subject);
        }
        other => panic!("expected theft suspicion, got {other:?}"),
    }

    // The legitimate holder is locked out too
    let err = svc
        .validate(&rotated.token.series, &rotated.token.token_value)
        .await
        .unwrap_err();
    assert!(matches!(err, RememberMeError::NotFound));
    assert!(storage::get_persistent_login(db.connection(), &issued.series)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_unknown_series_is_not_found() {
    let db = TestDb::new().await;
    let svc = service(&db);

    let err = svc.validate("no-such-series", "whatever").await.unwrap_err();
    assert!(matches!(err, RememberMeError::NotFound));
}

#[tokio::test]
async fn test_expired_login_is_rejected_without_rotation() {
    let db = TestDb::new().await;
    let user = UserBuilder::new("kenny")
        .with_role(Role::User)
        .create(db.connection())
        .await;
    let svc = service(&db);

    let issued = svc.issue(&user.subject).await.unwrap();
    let stale = Utc::now().timestamp() - VALIDITY - 60;
    backdate_persistent_login(db.connection(), &issued.series, stale).await;

    let err = svc
        .validate(&issued.series, &issued.token_value)
        .await
        .unwrap_err();
    assert!(matches!(err, RememberMeError::Expired));

    let stored = storage::get_persistent_login(db.connection(), &issued.series)
        .await
        .unwrap()
        .expect("expired record stays until the sweep");
    assert_eq!(stored.token_value, issued.token_value);
    assert_eq!(stored.last_used, stale);
}

#[tokio::test]
async fn test_stale_value_on_expired_series_still_purges() {
    let db = TestDb::new().await;
    let user = UserBuilder::new("kyle")
        .with_role(Role::User)
        .create(db.connection())
        .await;
    let svc = service(&db);

    let issued = svc.issue(&user.subject).await.unwrap();
    backdate_persistent_login(db.connection(), &issued.series, 0).await;

    let err = svc.validate(&issued.series, "not-the-token").await.unwrap_err();
    assert!(err.is_theft());
    assert!(storage::get_persistent_login(db.connection(), &issued.series)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_login_of_removed_user_is_dropped() {
    let db = TestDb::new().await;
    let user = UserBuilder::new("ghost")
        .with_role(Role::User)
        .create(db.connection())
        .await;
    let svc = service(&db);

    let issued = svc.issue(&user.subject).await.unwrap();
    storage::remove_user_profile(db.connection(), &user.subject, Role::User)
        .await
        .unwrap();

    let err = svc
        .validate(&issued.series, &issued.token_value)
        .await
        .unwrap_err();
    assert!(matches!(err, RememberMeError::UserNotFound(ref id) if id == &user.subject));
    assert!(storage::get_persistent_login(db.connection(), &issued.series)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_invalidate_removes_one_series() {
    let db = TestDb::new().await;
    let user = UserBuilder::new("stan")
        .with_role(Role::User)
        .create(db.connection())
        .await;
    let svc = service(&db);

    let laptop = svc.issue(&user.subject).await.unwrap();
    let phone = svc.issue(&user.subject).await.unwrap();

    svc.invalidate(&laptop.series).await.unwrap();
    // Removing an absent series is not an error
    svc.invalidate(&laptop.series).await.unwrap();

    assert!(matches!(
        svc.validate(&laptop.series, &laptop.token_value).await,
        Err(RememberMeError::NotFound)
    ));
    assert!(svc.validate(&phone.series, &phone.token_value).await.is_ok());
}

#[tokio::test]
async fn test_invalidate_user_removes_all_series() {
    let db = TestDb::new().await;
    let alice = UserBuilder::new("alice")
        .with_role(Role::User)
        .create(db.connection())
        .await;
    let bob = UserBuilder::new("bob")
        .with_role(Role::User)
        .create(db.connection())
        .await;
    let svc = service(&db);

    svc.issue(&alice.subject).await.unwrap();
    svc.issue(&alice.subject).await.unwrap();
    let kept = svc.issue(&bob.subject).await.unwrap();

    assert_eq!(svc.invalidate_user(&alice.subject).await.unwrap(), 2);
    assert!(svc.validate(&kept.series, &kept.token_value).await.is_ok());
}

#[tokio::test]
async fn test_sweep_removes_only_expired_logins() {
    let db = TestDb::new().await;
    let user = UserBuilder::new("wendy")
        .with_role(Role::User)
        .create(db.connection())
        .await;
    let svc = service(&db);

    let old = svc.issue(&user.subject).await.unwrap();
    let fresh = svc.issue(&user.subject).await.unwrap();
    backdate_persistent_login(db.connection(), &old.series, Utc::now().timestamp() - VALIDITY - 1)
        .await;

    assert_eq!(svc.sweep_expired().await.unwrap(), 1);
    assert!(db.connection().get_token(&old.series).await.unwrap().is_none());
    assert!(db.connection().get_token(&fresh.series).await.unwrap().is_some());
}

#[tokio::test]
async fn test_concurrent_validation_has_single_winner() {
    let db = TestDb::new().await;
    let user = UserBuilder::new("butters")
        .with_role(Role::User)
        .create(db.connection())
        .await;
    let svc = service(&db);

    let issued = svc.issue(&user.subject).await.unwrap();
    let (a, b) = tokio::join!(
        svc.validate(&issued.series, &issued.token_value),
        svc.validate(&issued.series, &issued.token_value),
    );

    let winners = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(winners, 1, "exactly one request may rotate the token");

    let loser = if a.is_ok() { b } else { a };
    let loser = loser.unwrap_err();
    assert!(
        matches!(
            loser,
            RememberMeError::Contended | RememberMeError::TheftSuspected { .. }
        ),
        "unexpected loser outcome: {loser:?}"
    );
}

#[tokio::test]
async fn test_huge_validity_window_does_not_overflow() {
    let db = TestDb::new().await;
    let user = UserBuilder::new("timmy")
        .with_role(Role::User)
        .create(db.connection())
        .await;
    let svc = DbRememberMeService::new(db.connection().clone(), db.connection().clone(), i64::MAX);

    let issued = svc.issue(&user.subject).await.unwrap();
    assert!(svc.validate(&issued.series, &issued.token_value).await.is_ok());
    assert_eq!(svc.sweep_expired().await.unwrap(), 0);
}
