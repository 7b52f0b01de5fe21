//! Challenge flow integration tests using wiremock
//!
//! Drives the composer through the full hybrid flow against a mock
//! authorization server:
//!
//! - Anonymous request -> redirect carrying exactly the configured scopes.
//! - Matching callback -> code exchange -> `SignedIn` with the name taken
//!   from `given_name`.
//! - Forged `state`, wrong `nonce`, token endpoint errors, timeouts and
//!   remote `error` callbacks all end in `ChallengeFailed` without a session.

mod common;

use std::time::Duration;

use axum_extra::extract::cookie::CookieJar;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{auth_config, auth_config_with, composer, query_param, token_response, unsigned_jwt};
use frontdoor::scheme::challenge::CallbackParams;
use frontdoor::scheme::composer::SignInOutcome;
use frontdoor::scheme::{AuthorizationDecision, ChallengeState, SchemeComposer, SessionValidation};
use frontdoor::FrontdoorError;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Claims the mock authorization server asserts for the test user.
fn frank(nonce: &str) -> serde_json::Value {
    json!({
        "iss": "https://localhost:44361",
        "sub": "d860efca-22d9-47fd-8249-791ba61b07c7",
        "aud": "imagegalleryclient",
        "nonce": nonce,
        "given_name": "Frank",
        "family_name": "Underwood",
        "role": "FreeUser",
        "sid": "5f4e8d",
        "idp": "local",
        "amr": ["pwd"]
    })
}

/// Starts a challenge and returns the jar, `state` and `nonce`.
fn start(composer: &SchemeComposer, return_url: &str) -> (CookieJar, String, String) {
    let (jar, redirect) = composer
        .challenge(CookieJar::new(), Some(return_url))
        .expect("challenge must start");
    assert_eq!(redirect.flow.state(), ChallengeState::Redirected);
    let state = query_param(&redirect.location, "state");
    let nonce = query_param(&redirect.location, "nonce");
    (jar, state, nonce)
}

fn assert_error(err: &anyhow::Error, check: impl Fn(&FrontdoorError) -> bool) {
    let inner = err
        .downcast_ref::<FrontdoorError>()
        .unwrap_or_else(|| panic!("not a FrontdoorError: {err}"));
    assert!(check(inner), "unexpected error: {inner}");
}

// ---------------------------------------------------------------------------
// Scenario: anonymous -> redirect -> callback -> SignedIn
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_anonymous_request_signs_in_end_to_end() {
    let server = MockServer::start().await;
    let config = auth_config(&server.uri());
    let composer = composer(&config);

    // Anonymous request requires a challenge.
    assert!(matches!(
        composer.authorize(&CookieJar::new()),
        AuthorizationDecision::ChallengeRequired
    ));

    let (jar, redirect) = composer
        .challenge(CookieJar::new(), Some("/images"))
        .unwrap();
    let location = &redirect.location;
    assert_eq!(location.path(), "/authorize");
    assert_eq!(query_param(location, "scope"), "openid profile address roles");
    assert_eq!(query_param(location, "response_type"), "code id_token");
    assert_eq!(query_param(location, "client_id"), "imagegalleryclient");
    assert_eq!(
        query_param(location, "redirect_uri"),
        "https://app.example.com/signin-oidc"
    );

    let state = query_param(location, "state");
    let nonce = query_param(location, "nonce");

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=auth-code-1"))
        .and(body_string_contains("client_secret=secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response(&frank(&nonce))))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = composer
        .sign_in_callback(
            "oidc",
            jar,
            CallbackParams {
                code: Some("auth-code-1".to_string()),
                id_token: Some(unsigned_jwt(&frank(&nonce))),
                state: Some(state),
                ..Default::default()
            },
        )
        .await;

    assert_eq!(outcome.flow.state(), ChallengeState::SignedIn);
    assert_eq!(
        outcome.flow.history(),
        [
            ChallengeState::Anonymous,
            ChallengeState::Redirected,
            ChallengeState::CodeReceived,
            ChallengeState::TokensExchanged,
            ChallengeState::ClaimsResolved,
            ChallengeState::SignedIn,
        ]
    );

    let signed_in = outcome.result.expect("sign-in must succeed");
    assert_eq!(signed_in.return_url, "/images");
    assert_eq!(signed_in.record.scheme, "Cookies");

    let principal = &signed_in.record.principal;
    assert_eq!(principal.name(), "Frank");
    assert_eq!(principal.roles(), ["FreeUser".to_string()]);
    assert!(principal.claim_values("sid").is_empty());
    assert!(principal.claim_values("idp").is_empty());
    assert!(principal.claim_values("nonce").is_empty());
    assert!(principal.claim_values("amr").is_empty());
    assert_eq!(principal.find_first("family_name"), Some("Underwood"));

    // Tokens are not persisted unless save_tokens is set.
    assert!(signed_in.record.tokens.is_none());

    // The next request is authenticated by the session cookie.
    match composer.authorize(&outcome.jar) {
        AuthorizationDecision::Authenticated(context) => {
            assert_eq!(context.principal().name(), "Frank");
            assert!(context.access_token().is_none());
        }
        other => panic!("expected authenticated, got {other:?}"),
    }
}

#[tokio::test]
async fn test_sign_in_saves_tokens_and_merges_userinfo() {
    let server = MockServer::start().await;
    let config = auth_config_with(
        &server.uri(),
        "    save_tokens: true\n    get_claims_from_userinfo_endpoint: true\n",
    );
    let composer = composer(&config);
    let (jar, state, nonce) = start(&composer, "/");

    let mut id_claims = frank(&nonce);
    id_claims.as_object_mut().unwrap().remove("role");

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response(&id_claims)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .and(header("authorization", "Bearer access-token-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sub": "d860efca-22d9-47fd-8249-791ba61b07c7",
            "given_name": "Frank",
            "address": "Main Road 1",
            "role": ["FreeUser", "Tester"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = composer
        .sign_in_callback(
            "oidc",
            jar,
            CallbackParams {
                code: Some("auth-code-2".to_string()),
                id_token: Some(unsigned_jwt(&id_claims)),
                state: Some(state),
                ..Default::default()
            },
        )
        .await;

    let signed_in = outcome.result.expect("sign-in must succeed");
    let principal = &signed_in.record.principal;
    assert_eq!(principal.name(), "Frank");
    assert_eq!(principal.find_first("address"), Some("Main Road 1"));
    assert!(principal.is_in_role("FreeUser"));
    assert!(principal.is_in_role("Tester"));

    let tokens = signed_in.record.tokens.expect("tokens must be saved");
    assert_eq!(tokens.access_token, "access-token-123");
    assert_eq!(tokens.refresh_token.as_deref(), Some("refresh-token-456"));

    match composer.authorize(&outcome.jar) {
        AuthorizationDecision::Authenticated(context) => {
            assert_eq!(context.access_token(), Some("access-token-123"));
        }
        other => panic!("expected authenticated, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Correlation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_forged_state_is_rejected_without_exchanging_code() {
    let server = MockServer::start().await;
    let composer = composer(&auth_config(&server.uri()));
    let (jar, _state, nonce) = start(&composer, "/");

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response(&frank(&nonce))))
        .expect(0)
        .mount(&server)
        .await;

    let outcome = composer
        .sign_in_callback(
            "oidc",
            jar,
            CallbackParams {
                code: Some("auth-code-1".to_string()),
                id_token: Some(unsigned_jwt(&frank(&nonce))),
                state: Some("forged-state".to_string()),
                ..Default::default()
            },
        )
        .await;

    assert_eq!(outcome.flow.state(), ChallengeState::ChallengeFailed);
    assert_error(&outcome.result.unwrap_err(), |e| {
        matches!(e, FrontdoorError::CorrelationMismatch(_))
    });
    assert_eq!(
        composer.authenticate(&outcome.jar),
        SessionValidation::Absent
    );
}

#[tokio::test]
async fn test_replayed_callback_is_rejected() {
    let server = MockServer::start().await;
    let composer = composer(&auth_config(&server.uri()));
    let (jar, state, nonce) = start(&composer, "/");

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response(&frank(&nonce))))
        .expect(1)
        .mount(&server)
        .await;

    let params = CallbackParams {
        code: Some("auth-code-1".to_string()),
        id_token: Some(unsigned_jwt(&frank(&nonce))),
        state: Some(state),
        ..Default::default()
    };

    let first = composer.sign_in_callback("oidc", jar, params.clone()).await;
    assert!(first.result.is_ok());

    // The correlation cookie was consumed by the first callback.
    let replay = composer.sign_in_callback("oidc", first.jar, params).await;
    assert_error(&replay.result.unwrap_err(), |e| {
        matches!(e, FrontdoorError::CorrelationMismatch(_))
    });
}

#[tokio::test]
async fn test_wrong_nonce_is_rejected() {
    let server = MockServer::start().await;
    let composer = composer(&auth_config(&server.uri()));
    let (jar, state, _nonce) = start(&composer, "/");

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(token_response(&frank("other-nonce"))),
        )
        .expect(0)
        .mount(&server)
        .await;

    let outcome = composer
        .sign_in_callback(
            "oidc",
            jar,
            CallbackParams {
                code: Some("auth-code-1".to_string()),
                id_token: Some(unsigned_jwt(&frank("other-nonce"))),
                state: Some(state),
                ..Default::default()
            },
        )
        .await;

    assert_error(&outcome.result.unwrap_err(), |e| {
        matches!(e, FrontdoorError::CorrelationMismatch(_))
    });
}

// ---------------------------------------------------------------------------
// Back-channel failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_token_endpoint_error_preserves_upstream_reason() {
    let server = MockServer::start().await;
    let composer = composer(&auth_config(&server.uri()));
    let (jar, state, nonce) = start(&composer, "/");

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "authorization code expired"
        })))
        .mount(&server)
        .await;

    let outcome = composer
        .sign_in_callback(
            "oidc",
            jar,
            CallbackParams {
                code: Some("stale-code".to_string()),
                id_token: Some(unsigned_jwt(&frank(&nonce))),
                state: Some(state),
                ..Default::default()
            },
        )
        .await;

    assert_eq!(outcome.flow.state(), ChallengeState::ChallengeFailed);
    let err = outcome.result.unwrap_err();
    assert_error(&err, |e| matches!(e, FrontdoorError::TokenExchangeFailure(_)));
    assert!(err.to_string().contains("invalid_grant"));
    assert!(err.to_string().contains("authorization code expired"));
    assert_eq!(
        composer.authenticate(&outcome.jar),
        SessionValidation::Absent
    );
}

#[tokio::test]
async fn test_token_endpoint_timeout_fails_the_flow() {
    let server = MockServer::start().await;
    let composer = composer(&auth_config(&server.uri()));
    let (jar, state, nonce) = start(&composer, "/");

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_response(&frank(&nonce)))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let started = std::time::Instant::now();
    let outcome = composer
        .sign_in_callback(
            "oidc",
            jar,
            CallbackParams {
                code: Some("auth-code-1".to_string()),
                id_token: Some(unsigned_jwt(&frank(&nonce))),
                state: Some(state),
                ..Default::default()
            },
        )
        .await;

    assert!(started.elapsed() < Duration::from_secs(8));
    assert_eq!(outcome.flow.state(), ChallengeState::ChallengeFailed);
    let err = outcome.result.unwrap_err();
    assert_error(&err, |e| matches!(e, FrontdoorError::TokenExchangeFailure(_)));
    assert!(err.to_string().contains("timed out"));
}

/// Signs in against a userinfo endpoint answering with `userinfo` and
/// returns the outcome, which is expected to fail.
async fn sign_in_with_userinfo(userinfo: ResponseTemplate) -> (SchemeComposer, SignInOutcome) {
    let server = MockServer::start().await;
    let composer = composer(&auth_config_with(
        &server.uri(),
        "    get_claims_from_userinfo_endpoint: true\n",
    ));
    let (jar, state, nonce) = start(&composer, "/");

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response(&frank(&nonce))))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(userinfo)
        .expect(1)
        .mount(&server)
        .await;

    let outcome = composer
        .sign_in_callback(
            "oidc",
            jar,
            CallbackParams {
                code: Some("auth-code-1".to_string()),
                id_token: Some(unsigned_jwt(&frank(&nonce))),
                state: Some(state),
                ..Default::default()
            },
        )
        .await;
    (composer, outcome)
}

fn assert_userinfo_failure(composer: &SchemeComposer, outcome: SignInOutcome, needle: &str) {
    assert_eq!(outcome.flow.state(), ChallengeState::ChallengeFailed);
    assert_eq!(
        composer.authenticate(&outcome.jar),
        SessionValidation::Absent
    );
    let err = outcome.result.unwrap_err();
    assert_error(&err, |e| matches!(e, FrontdoorError::TokenExchangeFailure(_)));
    assert!(err.to_string().contains(needle), "{err} should mention {needle}");
}

#[tokio::test]
async fn test_userinfo_timeout_fails_the_flow() {
    let started = std::time::Instant::now();
    let (composer, outcome) = sign_in_with_userinfo(
        ResponseTemplate::new(200)
            .set_body_json(json!({"sub": "d860efca-22d9-47fd-8249-791ba61b07c7"}))
            .set_delay(Duration::from_secs(10)),
    )
    .await;

    assert!(started.elapsed() < Duration::from_secs(8));
    assert_userinfo_failure(&composer, outcome, "userinfo request timed out");
}

#[tokio::test]
async fn test_userinfo_error_status_fails_the_flow() {
    let (composer, outcome) = sign_in_with_userinfo(
        ResponseTemplate::new(401).set_body_json(json!({
            "error": "invalid_token",
            "error_description": "access token revoked"
        })),
    )
    .await;

    assert_userinfo_failure(&composer, outcome, "invalid_token");
}

#[tokio::test]
async fn test_userinfo_non_object_body_fails_the_flow() {
    let (composer, outcome) =
        sign_in_with_userinfo(ResponseTemplate::new(200).set_body_json(json!(["not", "an", "object"])))
            .await;

    assert_userinfo_failure(&composer, outcome, "not a JSON object");
}

#[tokio::test]
async fn test_remote_error_callback_fails_after_correlation() {
    let server = MockServer::start().await;
    let composer = composer(&auth_config(&server.uri()));
    let (jar, state, _nonce) = start(&composer, "/");

    let outcome = composer
        .sign_in_callback(
            "oidc",
            jar,
            CallbackParams {
                state: Some(state),
                error: Some("access_denied".to_string()),
                error_description: Some("The user denied consent".to_string()),
                ..Default::default()
            },
        )
        .await;

    assert_eq!(outcome.flow.state(), ChallengeState::ChallengeFailed);
    assert_error(&outcome.result.unwrap_err(), |e| {
        matches!(e, FrontdoorError::RemoteFailure { error, description }
            if error == "access_denied" && description.as_deref() == Some("The user denied consent"))
    });
}

#[tokio::test]
async fn test_missing_name_claim_fails_closed() {
    let server = MockServer::start().await;
    let composer = composer(&auth_config(&server.uri()));
    let (jar, state, nonce) = start(&composer, "/");

    let mut claims = frank(&nonce);
    claims.as_object_mut().unwrap().remove("given_name");

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response(&claims)))
        .mount(&server)
        .await;

    let outcome = composer
        .sign_in_callback(
            "oidc",
            jar,
            CallbackParams {
                code: Some("auth-code-1".to_string()),
                id_token: Some(unsigned_jwt(&claims)),
                state: Some(state),
                ..Default::default()
            },
        )
        .await;

    assert_eq!(outcome.flow.state(), ChallengeState::ChallengeFailed);
    assert_error(&outcome.result.unwrap_err(), |e| {
        matches!(e, FrontdoorError::IdentityResolution(_))
    });
    assert_eq!(
        composer.authenticate(&outcome.jar),
        SessionValidation::Absent
    );
}

#[tokio::test]
async fn test_subject_mismatch_between_id_tokens_fails() {
    let server = MockServer::start().await;
    let composer = composer(&auth_config(&server.uri()));
    let (jar, state, nonce) = start(&composer, "/");

    let mut other = frank(&nonce);
    other["sub"] = json!("someone-else");

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response(&other)))
        .mount(&server)
        .await;

    let outcome = composer
        .sign_in_callback(
            "oidc",
            jar,
            CallbackParams {
                code: Some("auth-code-1".to_string()),
                id_token: Some(unsigned_jwt(&frank(&nonce))),
                state: Some(state),
                ..Default::default()
            },
        )
        .await;

    assert_eq!(outcome.flow.state(), ChallengeState::ChallengeFailed);
    assert_error(&outcome.result.unwrap_err(), |e| {
        matches!(e, FrontdoorError::TokenExchangeFailure(_))
    });
}

#[tokio::test]
async fn test_unknown_scheme_callback_fails() {
    let server = MockServer::start().await;
    let composer = composer(&auth_config(&server.uri()));

    let outcome = composer
        .sign_in_callback("nope", CookieJar::new(), CallbackParams::default())
        .await;

    assert_eq!(outcome.flow.state(), ChallengeState::ChallengeFailed);
    assert!(outcome.result.is_err());
}
