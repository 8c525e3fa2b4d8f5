//! Conditional-update guarantees of the PostgreSQL backend. Needs a running
//! database: `DATABASE_URL=postgres://... cargo test -- --ignored`.

use std::sync::Arc;

use chrono::Utc;
use credential_service::{
    config::DatabaseConfig,
    db,
    models::{
        AuthorizationCode, ClientApplication, ClientType, Organization, Permission, RefreshToken,
        Role, User,
    },
    store::{postgres::PgCredentialStore, CredentialStore, StoreError},
};
use uuid::Uuid;

async fn store() -> Arc<PgCredentialStore> {
    let config = DatabaseConfig {
        url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/credential_test".to_string()),
        max_connections: 8,
        min_connections: 1,
        acquire_timeout_secs: 5,
    };
    let pool = db::create_pool(&config).await.expect("Failed to connect");
    db::run_migrations(&pool).await.expect("Failed to migrate");
    Arc::new(PgCredentialStore::new(pool))
}

async fn seed(store: &PgCredentialStore) -> (User, Organization, ClientApplication) {
    let user = store
        .create_user(User::new(
            format!("{}@example.com", Uuid::new_v4()),
            "hash".to_string(),
            None,
        ))
        .await
        .unwrap();
    let org = store
        .create_organization(Organization::new(
            "Acme".to_string(),
            format!("acme-{}", &Uuid::new_v4().simple().to_string()[..8]),
        ))
        .await
        .unwrap();
    let client = store
        .create_client(ClientApplication::new(
            Uuid::new_v4().simple().to_string(),
            org.organization_id,
            "Acme app".to_string(),
            ClientType::Public,
            None,
            vec!["http://localhost/callback".to_string()],
            vec!["profile".to_string()],
        ))
        .await
        .unwrap();
    (user, org, client)
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL
async fn test_authorization_code_consumed_once() {
    let store = store().await;
    let (user, org, client) = seed(&store).await;
    let code_hash = Uuid::new_v4().to_string();
    store
        .insert_authorization_code(AuthorizationCode::new(
            code_hash.clone(),
            client.client_id.clone(),
            user.user_id,
            org.organization_id,
            "http://localhost/callback".to_string(),
            "profile".to_string(),
            "challenge".to_string(),
            "S256".to_string(),
            10,
        ))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let code_hash = code_hash.clone();
        handles.push(tokio::spawn(async move {
            store.consume_authorization_code(&code_hash, Utc::now()).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL
async fn test_refresh_rotation_single_winner() {
    let store = store().await;
    let (user, org, _) = seed(&store).await;
    let token_hash = Uuid::new_v4().to_string();
    store
        .insert_refresh_token(RefreshToken::new(
            token_hash.clone(),
            user.user_id,
            None,
            org.organization_id,
            String::new(),
            30,
        ))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let token_hash = token_hash.clone();
        handles.push(tokio::spawn(async move {
            store.rotate_refresh_token(&token_hash, Utc::now()).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert!(store
        .find_refresh_token(&token_hash)
        .await
        .unwrap()
        .unwrap()
        .is_revoked());
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL
async fn test_cross_tenant_link_rejected_by_store() {
    let store = store().await;
    let (_, org_a, _) = seed(&store).await;
    let (_, org_b, _) = seed(&store).await;

    let permission = store
        .create_permission(Permission::custom(
            org_a.organization_id,
            "reports:export".to_string(),
            "reports".to_string(),
        ))
        .await
        .unwrap();
    let role = store
        .create_role(Role::custom(org_b.organization_id, "auditor".to_string()))
        .await
        .unwrap();

    assert!(store
        .add_role_permission(role.role_id, permission.permission_id)
        .await
        .is_err());
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL
async fn test_successor_rejected_after_family_revocation() {
    let store = store().await;
    let (user, org, _) = seed(&store).await;
    let first = RefreshToken::new(
        Uuid::new_v4().to_string(),
        user.user_id,
        None,
        org.organization_id,
        String::new(),
        30,
    );
    let family_id = first.family_id;
    let first_hash = first.token_hash.clone();
    store.insert_refresh_token(first).await.unwrap();
    store
        .rotate_refresh_token(&first_hash, Utc::now())
        .await
        .unwrap()
        .unwrap();

    // nothing live is left to flip, but the family itself is now dead
    store
        .revoke_user_refresh_tokens(user.user_id, Utc::now())
        .await
        .unwrap();

    let successor = RefreshToken::in_family(
        family_id,
        Uuid::new_v4().to_string(),
        user.user_id,
        None,
        org.organization_id,
        String::new(),
        30,
    );
    let successor_hash = successor.token_hash.clone();
    let err = store.insert_refresh_token(successor).await.unwrap_err();
    assert!(matches!(err, StoreError::FamilyRevoked(id) if id == family_id));
    assert!(store
        .find_refresh_token(&successor_hash)
        .await
        .unwrap()
        .is_none());
}
