//! HTTP integration
//!
//! Mounts the callback and sign-out endpoints and provides the middleware
//! that gates application routes, optionally by role. The middleware
//! places the [`SessionContext`] in request extensions; handlers take it
//! explicitly with `Extension<SessionContext>`.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use axum::{routing::get, Extension, Router};
//! use frontdoor::scheme::{SchemeComposer, SessionContext};
//!
//! # fn wire(composer: Arc<SchemeComposer>) -> Router {
//! let app = Router::new().route(
//!     "/",
//!     get(|Extension(session): Extension<SessionContext>| async move {
//!         format!("hello {}", session.principal().name())
//!     }),
//! );
//! frontdoor::server::router(composer, app)
//! # }
//! ```

use std::sync::Arc;

use axum::extract::{Form, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use axum_extra::extract::cookie::CookieJar;

use crate::error::FrontdoorError;
use crate::scheme::challenge::CallbackParams;
use crate::scheme::{AuthorizationDecision, Forbidden, SchemeComposer};

/// Wraps `app` in [`require_authentication`] and adds the front door's own
/// routes, which stay reachable without a session.
pub fn router(composer: Arc<SchemeComposer>, app: Router) -> Router {
    app.layer(middleware::from_fn_with_state(
        Arc::clone(&composer),
        require_authentication,
    ))
    .merge(auth_routes(composer))
}

/// Callback routes for every challenge scheme plus the sign-out route.
///
/// Callbacks accept `GET` (for `response_mode=query`) and `POST` (for
/// `response_mode=form_post`).
pub fn auth_routes(composer: Arc<SchemeComposer>) -> Router {
    let mut routes: Router<Arc<SchemeComposer>> = Router::new();

    for challenge in composer.challenges() {
        let query_scheme = challenge.name().to_string();
        let form_scheme = query_scheme.clone();

        routes = routes.route(
            challenge.callback_path(),
            get(
                move |State(composer): State<Arc<SchemeComposer>>,
                      jar: CookieJar,
                      Query(params): Query<CallbackParams>| async move {
                    complete_callback(&composer, &query_scheme, jar, params).await
                },
            )
            .post(
                move |State(composer): State<Arc<SchemeComposer>>,
                      jar: CookieJar,
                      Form(params): Form<CallbackParams>| async move {
                    complete_callback(&composer, &form_scheme, jar, params).await
                },
            ),
        );
    }

    let sign_out_path = composer.default_session().sign_out_path().to_string();
    routes
        .route(&sign_out_path, get(sign_out).post(sign_out))
        .with_state(composer)
}

/// Middleware enforcing the composer's decision.
///
/// Anonymous requests (missing, expired or tampered session) are redirected
/// to the authorization server with the original path as the return URL.
pub async fn require_authentication(
    State(composer): State<Arc<SchemeComposer>>,
    jar: CookieJar,
    request: Request,
    next: Next,
) -> Response {
    let decision = composer.authorize(&jar);
    enforce(&composer, decision, jar, request, next).await
}

/// Restricts `app` to principals holding `role`.
///
/// Signed-in principals without the role are redirected to the session
/// scheme's access-denied path instead of being challenged again.
pub fn require_role(
    composer: Arc<SchemeComposer>,
    role: impl Into<String>,
    app: Router,
) -> Router {
    let gate = RoleGate {
        composer,
        role: Arc::from(role.into()),
    };
    app.layer(middleware::from_fn_with_state(gate, enforce_role))
}

#[derive(Clone)]
struct RoleGate {
    composer: Arc<SchemeComposer>,
    role: Arc<str>,
}

async fn enforce_role(
    State(gate): State<RoleGate>,
    jar: CookieJar,
    request: Request,
    next: Next,
) -> Response {
    let decision = gate.composer.authorize_role(&jar, &gate.role);
    enforce(&gate.composer, decision, jar, request, next).await
}

async fn enforce(
    composer: &SchemeComposer,
    decision: AuthorizationDecision,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    match decision {
        AuthorizationDecision::Authenticated(context) => {
            request.extensions_mut().insert(context);
            next.run(request).await
        }
        AuthorizationDecision::Forbidden(forbidden) => {
            tracing::info!(role = %forbidden.role, "principal lacks required role");
            forbidden.into_response()
        }
        AuthorizationDecision::ChallengeRequired => {
            let return_url = request
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_string());
            match composer.challenge(jar, return_url.as_deref()) {
                Ok((jar, redirect)) => {
                    (jar, Redirect::to(redirect.location.as_str())).into_response()
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to start challenge");
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
            }
        }
    }
}

async fn complete_callback(
    composer: &SchemeComposer,
    scheme: &str,
    jar: CookieJar,
    params: CallbackParams,
) -> Response {
    let outcome = composer.sign_in_callback(scheme, jar, params).await;
    match outcome.result {
        Ok(signed_in) => (outcome.jar, Redirect::to(&signed_in.return_url)).into_response(),
        Err(e) => (outcome.jar, failure_response(&e)).into_response(),
    }
}

async fn sign_out(State(composer): State<Arc<SchemeComposer>>, jar: CookieJar) -> Response {
    let (jar, location) = composer.sign_out(jar);
    (jar, Redirect::to(&location)).into_response()
}

/// Maps a failed sign-in to a generic response. Upstream detail is only
/// logged.
fn failure_response(err: &anyhow::Error) -> Response {
    let status = match err.downcast_ref::<FrontdoorError>() {
        Some(FrontdoorError::CorrelationMismatch(_)) => StatusCode::BAD_REQUEST,
        Some(FrontdoorError::RemoteFailure { .. }) => StatusCode::UNAUTHORIZED,
        Some(FrontdoorError::TokenExchangeFailure(_)) => StatusCode::BAD_GATEWAY,
        Some(FrontdoorError::IdentityResolution(_)) => StatusCode::FORBIDDEN,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::warn!(status = %status, error = %err, "sign-in failed");
    (status, "Sign-in failed. Please try again.").into_response()
}

impl IntoResponse for Forbidden {
    fn into_response(self) -> Response {
        Redirect::to(&self.redirect_to).into_response()
    }
}
