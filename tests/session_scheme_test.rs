//! Session scheme integration tests
//!
//! Covers the sealed-cookie session as seen through the composer:
//!
//! - An established session authenticates later requests until it expires.
//! - Expired, tampered and foreign-key cookies lead to a new challenge.
//! - Role checks on an authenticated session yield `Forbidden`, not a
//!   challenge.
//! - Sign-out clears the cookie locally.

mod common;

use axum_extra::extract::cookie::{Cookie, CookieJar};
use chrono::{Duration, Utc};

use common::{auth_config, composer, composer_with_protector};
use frontdoor::claims::{Claim, RawClaimSet};
use frontdoor::policy::{IdentityPrincipal, TokenValidationPolicy};
use frontdoor::protection::DataProtector;
use frontdoor::scheme::{AuthorizationDecision, SessionValidation};

const AUTHORITY: &str = "https://localhost:44361";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn principal(roles: &[&str]) -> IdentityPrincipal {
    let mut claims = RawClaimSet::new();
    claims.push(Claim::new("given_name", "Frank", AUTHORITY));
    claims.push(Claim::new("sub", "d860efca", AUTHORITY));
    for role in roles {
        claims.push(Claim::new("role", *role, AUTHORITY));
    }
    TokenValidationPolicy::new("given_name", "role")
        .resolve_identity(&claims, "oidc")
        .expect("principal must resolve")
}

fn session_cookie_value(jar: &CookieJar, name: &str) -> String {
    jar.get(name)
        .map(|c| c.value().to_string())
        .expect("session cookie must be set")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn test_established_session_authenticates_until_expiry() {
    let composer = composer(&auth_config(AUTHORITY));
    let session = composer.default_session();
    let issued = Utc::now();

    let (jar, record) = session
        .establish_at(CookieJar::new(), principal(&["FreeUser"]), None, issued)
        .unwrap();
    assert_eq!(record.expires_at, issued + Duration::seconds(3600));

    match composer.authorize_at(&jar, issued + Duration::seconds(3599)) {
        AuthorizationDecision::Authenticated(context) => {
            assert_eq!(context.principal().name(), "Frank");
            assert_eq!(context.scheme(), "Cookies");
            assert_eq!(context.expires_at(), record.expires_at);
        }
        other => panic!("expected authenticated, got {other:?}"),
    }

    assert_eq!(
        session.validate_at(&jar, record.expires_at),
        SessionValidation::Expired
    );
    assert!(matches!(
        composer.authorize_at(&jar, record.expires_at),
        AuthorizationDecision::ChallengeRequired
    ));
}

#[test]
fn test_tampered_cookie_requires_challenge() {
    let composer = composer(&auth_config(AUTHORITY));
    let session = composer.default_session();
    let (jar, _) = session
        .establish(CookieJar::new(), principal(&[]), None)
        .unwrap();

    let mut value = session_cookie_value(&jar, session.cookie_name());
    let last = value.pop().unwrap();
    value.push(if last == 'A' { 'B' } else { 'A' });
    let tampered = CookieJar::new().add(Cookie::new(session.cookie_name().to_string(), value));

    assert_eq!(session.validate(&tampered), SessionValidation::Invalid);
    assert!(matches!(
        composer.authorize(&tampered),
        AuthorizationDecision::ChallengeRequired
    ));
}

#[test]
fn test_cookie_from_another_deployment_is_invalid() {
    let config = auth_config(AUTHORITY);
    let ours = composer(&config);
    let theirs = composer_with_protector(&config, DataProtector::ephemeral());

    let (jar, _) = theirs
        .default_session()
        .establish(CookieJar::new(), principal(&[]), None)
        .unwrap();

    assert_eq!(ours.authenticate(&jar), SessionValidation::Invalid);
    assert!(matches!(
        theirs.authenticate(&jar),
        SessionValidation::Valid(_)
    ));
}

#[test]
fn test_shared_key_survives_restart() {
    let config = auth_config(AUTHORITY);
    let key = [7u8; 32];
    let before = composer_with_protector(&config, DataProtector::new(&key).unwrap());
    let after = composer_with_protector(&config, DataProtector::new(&key).unwrap());

    let (jar, record) = before
        .default_session()
        .establish(CookieJar::new(), principal(&["PayingUser"]), None)
        .unwrap();

    assert_eq!(after.authenticate(&jar), SessionValidation::Valid(record));
}

#[test]
fn test_missing_role_is_forbidden_not_challenged() {
    let composer = composer(&auth_config(AUTHORITY));
    let (jar, _) = composer
        .default_session()
        .establish(CookieJar::new(), principal(&["FreeUser"]), None)
        .unwrap();

    match composer.authorize_role(&jar, "PayingUser") {
        AuthorizationDecision::Forbidden(forbidden) => {
            assert_eq!(forbidden.role, "PayingUser");
            assert_eq!(forbidden.redirect_to, "/Account/AccessDenied");
        }
        other => panic!("expected forbidden, got {other:?}"),
    }

    assert!(matches!(
        composer.authorize_role(&jar, "FreeUser"),
        AuthorizationDecision::Authenticated(_)
    ));
    assert!(matches!(
        composer.authorize_role(&CookieJar::new(), "FreeUser"),
        AuthorizationDecision::ChallengeRequired
    ));
}

#[test]
fn test_sign_out_clears_session() {
    let composer = composer(&auth_config(AUTHORITY));
    let session = composer.default_session();
    let (jar, _) = session
        .establish(CookieJar::new(), principal(&[]), None)
        .unwrap();

    let (jar, location) = composer.sign_out(jar);
    assert_eq!(location, "/");
    assert!(jar.get(session.cookie_name()).is_none());
    assert_eq!(composer.authenticate(&jar), SessionValidation::Absent);
}
