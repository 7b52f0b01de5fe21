//! Claim action pipeline
//!
//! Inbound identity claims pass through an ordered list of [`ClaimAction`]s
//! before the token validation policy turns them into a principal. The
//! pipeline starts by withholding the protocol claims listed in a
//! [`DefaultClaimMap`]; actions then reveal (`Remove`), drop (`Delete`) or
//! rename (`MapUniqueJsonKey`) claims.
//!
//! # Execution model
//!
//! 1. Claims whose type is in the default suppression set are withheld.
//! 2. Actions run strictly in registration order against the working set;
//!    each action sees the cumulative effect of the ones before it.
//! 3. Claims still withheld after the last action are discarded.
//!
//! The pipeline holds no mutable state; [`ClaimActionPipeline::apply`] can
//! run concurrently from any number of requests.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::claims::types::{issuer_of, json_claim_values, Claim, RawClaimSet};

/// Claim types hidden by the default inbound mapping of an OIDC handler.
pub const DEFAULT_SUPPRESSED_CLAIMS: &[&str] = &[
    "nonce", "aud", "azp", "acr", "amr", "iss", "iat", "nbf", "exp", "at_hash", "c_hash",
    "auth_time", "ipaddr", "platf", "ver", "sid", "idp",
];

// ---------------------------------------------------------------------------
// ClaimAction
// ---------------------------------------------------------------------------

/// A single named claim transformation.
///
/// Serialized in configuration as a single-key map:
///
/// ```yaml
/// claim_actions:
///   - remove: amr
///   - delete: sid
///   - map_unique_json_key: { source_key: role, target_type: role }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimAction {
    /// Cancels the default suppression of a claim type so that it flows
    /// through to the principal.
    Remove(String),

    /// Removes every claim of the type from the working set.
    Delete(String),

    /// Copies `payload[source_key]` into a claim of `target_type` unless a
    /// claim of that type already exists.
    MapUniqueJsonKey {
        /// Key read from the raw JSON payload
        source_key: String,
        /// Claim type written to the working set
        target_type: String,
    },
}

impl ClaimAction {
    /// Shorthand for [`ClaimAction::Remove`].
    pub fn remove(claim_type: impl Into<String>) -> Self {
        Self::Remove(claim_type.into())
    }

    /// Shorthand for [`ClaimAction::Delete`].
    pub fn delete(claim_type: impl Into<String>) -> Self {
        Self::Delete(claim_type.into())
    }

    /// Shorthand for [`ClaimAction::MapUniqueJsonKey`].
    pub fn map_unique_json_key(
        source_key: impl Into<String>,
        target_type: impl Into<String>,
    ) -> Self {
        Self::MapUniqueJsonKey {
            source_key: source_key.into(),
            target_type: target_type.into(),
        }
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Remove(_) => "remove",
            Self::Delete(_) => "delete",
            Self::MapUniqueJsonKey { .. } => "map_unique_json_key",
        }
    }
}

// ---------------------------------------------------------------------------
// DefaultClaimMap
// ---------------------------------------------------------------------------

/// Immutable set of claim types withheld by default.
///
/// Passed by value into [`ClaimActionPipeline::new`]; there is no
/// process-wide table to mutate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultClaimMap {
    suppressed: BTreeSet<String>,
}

impl DefaultClaimMap {
    /// The default OIDC suppression set ([`DEFAULT_SUPPRESSED_CLAIMS`]).
    pub fn oidc_defaults() -> Self {
        Self::from_types(DEFAULT_SUPPRESSED_CLAIMS.iter().copied())
    }

    /// A map that suppresses nothing.
    pub fn empty() -> Self {
        Self {
            suppressed: BTreeSet::new(),
        }
    }

    /// Builds a map from an explicit list of claim types.
    pub fn from_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            suppressed: types.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns `true` when the claim type is withheld by default.
    pub fn is_suppressed(&self, claim_type: &str) -> bool {
        self.suppressed.contains(claim_type)
    }

    /// The suppressed claim types in sorted order.
    pub fn suppressed(&self) -> &BTreeSet<String> {
        &self.suppressed
    }
}

impl Default for DefaultClaimMap {
    fn default() -> Self {
        Self::oidc_defaults()
    }
}

// ---------------------------------------------------------------------------
// ClaimActionPipeline
// ---------------------------------------------------------------------------

/// Ordered claim actions bound to a default suppression set.
///
/// # Examples
///
/// ```
/// use frontdoor::claims::{ClaimAction, ClaimActionPipeline, DefaultClaimMap, RawClaimSet};
///
/// let pipeline = ClaimActionPipeline::new(
///     DefaultClaimMap::oidc_defaults(),
///     vec![
///         ClaimAction::delete("sid"),
///         ClaimAction::delete("idp"),
///         ClaimAction::map_unique_json_key("role", "role"),
///     ],
/// );
///
/// let payload = serde_json::json!({"sid": "x", "idp": "y", "role": "admin"});
/// let payload = payload.as_object().unwrap();
/// let claims = pipeline.apply(payload, RawClaimSet::from_json(payload));
///
/// assert_eq!(claims.values_of("role"), vec!["admin"]);
/// assert!(!claims.has_type("sid"));
/// assert!(!claims.has_type("idp"));
/// ```
#[derive(Debug, Clone)]
pub struct ClaimActionPipeline {
    defaults: DefaultClaimMap,
    actions: Vec<ClaimAction>,
}

impl ClaimActionPipeline {
    /// Creates a pipeline from a suppression map and an ordered action list.
    pub fn new(defaults: DefaultClaimMap, actions: Vec<ClaimAction>) -> Self {
        Self { defaults, actions }
    }

    /// The registered actions in execution order.
    pub fn actions(&self) -> &[ClaimAction] {
        &self.actions
    }

    /// The default suppression map.
    pub fn defaults(&self) -> &DefaultClaimMap {
        &self.defaults
    }

    /// Runs the pipeline over `claims`, reading mapped values from `payload`.
    pub fn apply(&self, payload: &Map<String, Value>, claims: RawClaimSet) -> RawClaimSet {
        apply(&self.actions, &self.defaults, payload, claims)
    }
}

/// Applies `actions` in order to `claims`, withholding the types in
/// `defaults` until an action reveals them.
///
/// Output depends only on the inputs and the declared action order.
pub fn apply(
    actions: &[ClaimAction],
    defaults: &DefaultClaimMap,
    payload: &Map<String, Value>,
    claims: RawClaimSet,
) -> RawClaimSet {
    let mut suppressed = defaults.suppressed().clone();
    let mut working = RawClaimSet::new();
    let mut withheld: Vec<Claim> = Vec::new();

    for claim in claims {
        if suppressed.contains(&claim.claim_type) {
            withheld.push(claim);
        } else {
            working.push(claim);
        }
    }

    let issuer = issuer_of(payload);

    for action in actions {
        match action {
            ClaimAction::Remove(claim_type) => {
                if !suppressed.remove(claim_type) {
                    continue;
                }
                let (restored, still_withheld): (Vec<Claim>, Vec<Claim>) = withheld
                    .into_iter()
                    .partition(|c| &c.claim_type == claim_type);
                withheld = still_withheld;

                if restored.is_empty() {
                    if !working.has_type(claim_type) {
                        push_payload_values(&mut working, payload, claim_type, claim_type, &issuer);
                    }
                } else {
                    for claim in restored {
                        working.push(claim);
                    }
                }
            }
            ClaimAction::Delete(claim_type) => {
                working.take_type(claim_type);
            }
            ClaimAction::MapUniqueJsonKey {
                source_key,
                target_type,
            } => {
                if !working.has_type(target_type) {
                    push_payload_values(&mut working, payload, source_key, target_type, &issuer);
                }
            }
        }
        tracing::trace!(action = action.name(), claims = working.len(), "claim action applied");
    }

    tracing::debug!(
        actions = actions.len(),
        claims = working.len(),
        withheld = withheld.len(),
        "claim pipeline applied"
    );

    working
}

/// Adds one claim per distinct value of `payload[source_key]`.
fn push_payload_values(
    working: &mut RawClaimSet,
    payload: &Map<String, Value>,
    source_key: &str,
    target_type: &str,
    issuer: &str,
) {
    let Some(value) = payload.get(source_key) else {
        return;
    };
    for v in json_claim_values(value) {
        if !working.contains(target_type, &v) {
            working.push(Claim::new(target_type, v, issuer));
        }
    }
}
