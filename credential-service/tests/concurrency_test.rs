mod common;

use std::time::Duration;

use common::{pkce_pair, OAuthFixture, REDIRECT_URI};
use credential_service::{
    dtos::oauth::{AuthorizeParams, TokenRequest},
    handlers,
};

const RACERS: usize = 16;
const ROUNDS: usize = 20;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_code_exchange_has_single_winner() {
    let f = OAuthFixture::new("abc123", &["profile"]).await;
    let (verifier, challenge) = pkce_pair();
    let grant = handlers::authorize(
        &f.app.state,
        &f.user_ctx(),
        AuthorizeParams {
            client_id: "abc123".to_string(),
            redirect_uri: REDIRECT_URI.to_string(),
            scope: "profile".to_string(),
            code_challenge: challenge,
            code_challenge_method: Some("S256".to_string()),
        },
    )
    .await
    .unwrap();

    let mut handles = Vec::with_capacity(RACERS);
    for _ in 0..RACERS {
        let state = f.app.state.clone();
        let code = grant.code.clone();
        let verifier = verifier.clone();
        handles.push(tokio::spawn(async move {
            let ctx = state.new_context();
            handlers::exchange_token(
                &state,
                &ctx,
                TokenRequest {
                    grant_type: "authorization_code".to_string(),
                    code: Some(code),
                    redirect_uri: Some(REDIRECT_URI.to_string()),
                    code_verifier: Some(verifier),
                    client_id: Some("abc123".to_string()),
                    ..TokenRequest::default()
                },
            )
            .await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(err) => {
                assert_eq!(err.code(), "invalid_grant");
                assert_eq!(
                    err.to_body().error_description,
                    "authorization code has already been used"
                );
            }
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_refresh_leaves_no_live_successor() {
    let f = OAuthFixture::new("abc123", &["profile"]).await;

    for _ in 0..ROUNDS {
        let pair = f.app.login("owner@example.com", f.organization_id).await;

        let mut handles = Vec::with_capacity(RACERS);
        for _ in 0..RACERS {
            let state = f.app.state.clone();
            let refresh_token = pair.refresh_token.clone();
            handles.push(tokio::spawn(async move {
                let ctx = state.new_context();
                handlers::refresh(&state, &ctx, &refresh_token).await
            }));
        }

        let mut successors = Vec::new();
        let mut reuse_detected = 0;
        let mut family_revoked = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(next) => successors.push(next),
                Err(err) => match err.code() {
                    "refresh_token_reuse_detected" => reuse_detected += 1,
                    // the rotation winner lost to a family revocation
                    "invalid_grant" => family_revoked += 1,
                    other => panic!("unexpected error code {}", other),
                },
            }
        }

        // one rotation wins; every other racer is a replay
        assert_eq!(reuse_detected, RACERS - 1);
        assert_eq!(successors.len() + family_revoked, 1);

        // the replays revoked the family, including whatever the winner minted
        let ctx = f.app.ctx();
        for next in successors {
            assert!(handlers::refresh(&f.app.state, &ctx, &next.refresh_token)
                .await
                .is_err());
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_refresh_racing_session_revocation_leaves_nothing_live() {
    let f = OAuthFixture::new("abc123", &["profile"]).await;

    for _ in 0..ROUNDS {
        tokio::time::sleep(Duration::from_millis(2)).await;
        let pair = f.app.login("owner@example.com", f.organization_id).await;
        let (user_ctx, _) = f.app.bearer(&pair.access_token).await;

        let refresh = {
            let state = f.app.state.clone();
            let refresh_token = pair.refresh_token.clone();
            tokio::spawn(async move {
                let ctx = state.new_context();
                handlers::refresh(&state, &ctx, &refresh_token).await
            })
        };
        let revoke = {
            let state = f.app.state.clone();
            let user_id = f.user_id;
            tokio::spawn(async move {
                handlers::revoke_user_sessions(&state, &user_ctx, user_id).await
            })
        };

        let refreshed = refresh.await.unwrap();
        revoke.await.unwrap().unwrap();

        let ctx = f.app.ctx();
        assert!(handlers::refresh(&f.app.state, &ctx, &pair.refresh_token)
            .await
            .is_err());
        if let Ok(next) = refreshed {
            assert!(handlers::refresh(&f.app.state, &ctx, &next.refresh_token)
                .await
                .is_err());
            let err = handlers::authenticate_bearer(&f.app.state, f.app.ctx(), &next.access_token)
                .await
                .unwrap_err();
            assert_eq!(err.code(), "token_revoked");
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_logins_share_nothing() {
    let f = OAuthFixture::new("abc123", &["profile"]).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let state = f.app.state.clone();
        let organization_id = f.organization_id;
        handles.push(tokio::spawn(async move {
            handlers::authenticate(
                &state,
                &state.new_context(),
                credential_service::dtos::auth::LoginRequest {
                    email: "owner@example.com".to_string(),
                    password: credential_service::utils::Password::new(
                        common::PASSWORD.to_string(),
                    ),
                    organization_id,
                },
            )
            .await
        }));
    }

    let mut refresh_tokens = std::collections::HashSet::new();
    for handle in handles {
        let pair = handle.await.unwrap().unwrap();
        assert!(refresh_tokens.insert(pair.refresh_token));
    }
    assert_eq!(refresh_tokens.len(), 8);
}
