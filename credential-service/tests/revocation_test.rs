mod common;

use std::time::Duration;

use common::TestApp;
use credential_service::{
    dtos::{
        admin::ChangeMemberRoleRequest,
        auth::{IntrospectRequest, LogoutRequest},
    },
    handlers::{self, admin},
};

async fn rejected_with(app: &TestApp, access_token: &str) -> &'static str {
    handlers::authenticate_bearer(&app.state, app.ctx(), access_token)
        .await
        .unwrap_err()
        .code()
}

/// New tokens must carry an issue time strictly after the watermark.
async fn tick() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

#[tokio::test]
async fn test_revoke_user_sessions_cuts_off_older_tokens() {
    let app = TestApp::spawn().await;
    let user = app.create_user("grace@example.com").await;
    let org = app.create_org(user, "grace-co").await;
    let pair = app.login("grace@example.com", org).await;
    let (ctx, _) = app.bearer(&pair.access_token).await;

    let revoked = handlers::revoke_user_sessions(&app.state, &ctx, user)
        .await
        .unwrap();
    assert_eq!(revoked, 1);

    assert_eq!(rejected_with(&app, &pair.access_token).await, "token_revoked");
    assert!(handlers::refresh(&app.state, &app.ctx(), &pair.refresh_token)
        .await
        .is_err());

    tick().await;
    let fresh = app.login("grace@example.com", org).await;
    app.bearer(&fresh.access_token).await;
}

#[tokio::test]
async fn test_global_revocation_of_someone_else_is_refused() {
    let app = TestApp::spawn().await;
    let owner = app.create_user("owner@example.com").await;
    let org = app.create_org(owner, "acme").await;
    let member = app.create_user("member@example.com").await;
    app.add_member(org, member, "member").await;

    let owner_pair = app.login("owner@example.com", org).await;
    let (owner_ctx, _) = app.bearer(&owner_pair.access_token).await;

    // org owners only reach the member's sessions inside their organization
    let err = handlers::revoke_user_sessions(&app.state, &owner_ctx, member)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "permission_denied");
}

#[tokio::test]
async fn test_revoke_org_sessions() {
    let app = TestApp::spawn().await;
    let owner = app.create_user("owner@example.com").await;
    let org = app.create_org(owner, "acme").await;
    let member = app.create_user("member@example.com").await;
    app.add_member(org, member, "member").await;
    let other_org = app.create_org(member, "member-side").await;

    let member_pair = app.login("member@example.com", org).await;
    let member_elsewhere = app.login("member@example.com", other_org).await;
    let owner_pair = app.login("owner@example.com", org).await;

    let (member_ctx, _) = app.bearer(&member_pair.access_token).await;
    let err = handlers::revoke_org_sessions(&app.state, &member_ctx)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "permission_denied");

    let (owner_ctx, _) = app.bearer(&owner_pair.access_token).await;
    let revoked = handlers::revoke_org_sessions(&app.state, &owner_ctx)
        .await
        .unwrap();
    assert_eq!(revoked, 2);

    assert_eq!(rejected_with(&app, &member_pair.access_token).await, "token_revoked");
    assert_eq!(rejected_with(&app, &owner_pair.access_token).await, "token_revoked");
    app.bearer(&member_elsewhere.access_token).await;
    handlers::refresh(&app.state, &app.ctx(), &member_elsewhere.refresh_token)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_revoke_user_in_org_leaves_other_orgs_alone() {
    let app = TestApp::spawn().await;
    let owner = app.create_user("owner@example.com").await;
    let org = app.create_org(owner, "acme").await;
    let member = app.create_user("member@example.com").await;
    app.add_member(org, member, "member").await;
    let other_org = app.create_org(member, "member-side").await;

    let here = app.login("member@example.com", org).await;
    let there = app.login("member@example.com", other_org).await;
    let owner_pair = app.login("owner@example.com", org).await;
    let (owner_ctx, _) = app.bearer(&owner_pair.access_token).await;

    handlers::revoke_user_in_org(&app.state, &owner_ctx, member)
        .await
        .unwrap();

    assert_eq!(rejected_with(&app, &here.access_token).await, "token_revoked");
    app.bearer(&there.access_token).await;
    app.bearer(&owner_pair.access_token).await;
}

#[tokio::test]
async fn test_removed_member_is_cut_off() {
    let app = TestApp::spawn().await;
    let owner = app.create_user("owner@example.com").await;
    let org = app.create_org(owner, "acme").await;
    let member = app.create_user("member@example.com").await;
    app.add_member(org, member, "member").await;

    let member_pair = app.login("member@example.com", org).await;
    let owner_pair = app.login("owner@example.com", org).await;
    let (owner_ctx, _) = app.bearer(&owner_pair.access_token).await;

    admin::remove_member(&app.state, &owner_ctx, member)
        .await
        .unwrap();

    assert_eq!(rejected_with(&app, &member_pair.access_token).await, "token_revoked");
    assert!(handlers::refresh(&app.state, &app.ctx(), &member_pair.refresh_token)
        .await
        .is_err());
    assert!(!handlers::check_access(&app.state, &app.ctx(), member, org, "org:read")
        .await
        .unwrap());
}

#[tokio::test]
async fn test_role_change_invalidates_tokens_with_old_roles() {
    let app = TestApp::spawn().await;
    let owner = app.create_user("owner@example.com").await;
    let org = app.create_org(owner, "acme").await;
    let member = app.create_user("member@example.com").await;
    app.add_member(org, member, "member").await;

    let before = app.login("member@example.com", org).await;
    let owner_pair = app.login("owner@example.com", org).await;
    let (owner_ctx, _) = app.bearer(&owner_pair.access_token).await;
    let admin_role = app.state.rbac.system_role(&app.ctx(), "admin").await.unwrap();

    admin::change_member_role(
        &app.state,
        &owner_ctx,
        member,
        ChangeMemberRoleRequest {
            role_id: admin_role.role_id,
        },
    )
    .await
    .unwrap();

    assert_eq!(rejected_with(&app, &before.access_token).await, "token_revoked");

    tick().await;
    let after = app.login("member@example.com", org).await;
    let (_, claims) = app.bearer(&after.access_token).await;
    assert_eq!(claims.roles, vec!["admin".to_string()]);
}

#[tokio::test]
async fn test_revoke_single_token() {
    let app = TestApp::spawn().await;
    let owner = app.create_user("owner@example.com").await;
    let org = app.create_org(owner, "acme").await;
    let member = app.create_user("member@example.com").await;
    app.add_member(org, member, "member").await;

    let owner_pair = app.login("owner@example.com", org).await;
    let second_owner_pair = app.login("owner@example.com", org).await;
    let member_pair = app.login("member@example.com", org).await;
    let (member_ctx, _) = app.bearer(&member_pair.access_token).await;
    let (owner_ctx, _) = app.bearer(&owner_pair.access_token).await;

    let err = handlers::revoke_token(&app.state, &member_ctx, &owner_pair.access_token)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "permission_denied");

    handlers::revoke_token(&app.state, &owner_ctx, &owner_pair.access_token)
        .await
        .unwrap();
    assert_eq!(rejected_with(&app, &owner_pair.access_token).await, "token_revoked");
    // only that token
    app.bearer(&second_owner_pair.access_token).await;

    // an admin may revoke a member's refresh token
    let (owner_ctx, _) = app.bearer(&second_owner_pair.access_token).await;
    handlers::revoke_token(&app.state, &owner_ctx, &member_pair.refresh_token)
        .await
        .unwrap();
    assert!(handlers::refresh(&app.state, &app.ctx(), &member_pair.refresh_token)
        .await
        .is_err());

    // unknown tokens are not an error
    handlers::revoke_token(&app.state, &owner_ctx, "not-a-token")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_logout_ends_the_session() {
    let app = TestApp::spawn().await;
    let user = app.create_user("henry@example.com").await;
    let org = app.create_org(user, "henry-co").await;
    let pair = app.login("henry@example.com", org).await;
    let (ctx, claims) = app.bearer(&pair.access_token).await;

    handlers::logout(
        &app.state,
        &ctx,
        &claims,
        LogoutRequest {
            refresh_token: Some(pair.refresh_token.clone()),
        },
    )
    .await
    .unwrap();

    assert_eq!(rejected_with(&app, &pair.access_token).await, "token_revoked");
    assert!(handlers::refresh(&app.state, &app.ctx(), &pair.refresh_token)
        .await
        .is_err());

    let introspection = handlers::introspect(
        &app.state,
        &app.ctx(),
        IntrospectRequest {
            token: pair.access_token,
        },
    )
    .await
    .unwrap();
    assert!(!introspection.active);
}
