//! Claim and raw claim set types
//!
//! A [`RawClaimSet`] is the ordered sequence of `(type, value, issuer)`
//! tuples produced by decoding an identity token or a userinfo response. It
//! is only mutated while the claim action pipeline runs over it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Issuer recorded on claims that carry no `iss` of their own.
pub const LOCAL_AUTHORITY: &str = "LOCAL AUTHORITY";

/// A single typed assertion about an identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Claim {
    /// Claim type, e.g. `given_name` or `role`
    #[serde(rename = "type")]
    pub claim_type: String,
    /// Claim value as a string
    pub value: String,
    /// Issuer that asserted the claim
    pub issuer: String,
}

impl Claim {
    /// Creates a new claim.
    ///
    /// # Examples
    ///
    /// ```
    /// use frontdoor::claims::Claim;
    ///
    /// let claim = Claim::new("role", "admin", "https://idp.example.com");
    /// assert_eq!(claim.claim_type, "role");
    /// ```
    pub fn new(
        claim_type: impl Into<String>,
        value: impl Into<String>,
        issuer: impl Into<String>,
    ) -> Self {
        Self {
            claim_type: claim_type.into(),
            value: value.into(),
            issuer: issuer.into(),
        }
    }
}

/// Ordered sequence of claims.
///
/// Duplicates are allowed; order is insertion order and is preserved by every
/// operation so that pipeline output is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawClaimSet {
    claims: Vec<Claim>,
}

impl RawClaimSet {
    /// Creates an empty claim set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Flattens a JSON object into claims.
    ///
    /// Keys are visited in the payload's iteration order. Strings map
    /// verbatim, numbers and booleans by their JSON text, each array element
    /// becomes its own claim, nested objects map to their JSON text and
    /// `null` values are skipped. The issuer is taken from the payload's `iss`
    /// when present.
    ///
    /// # Examples
    ///
    /// ```
    /// use frontdoor::claims::RawClaimSet;
    ///
    /// let payload = serde_json::json!({
    ///     "iss": "https://idp.example.com",
    ///     "role": ["admin", "user"],
    /// });
    /// let claims = RawClaimSet::from_json(payload.as_object().unwrap());
    /// assert_eq!(claims.values_of("role"), vec!["admin", "user"]);
    /// ```
    pub fn from_json(payload: &Map<String, Value>) -> Self {
        Self::from_json_with_issuer(payload, &issuer_of(payload))
    }

    /// Flattens a JSON object whose claims were asserted by `issuer`.
    ///
    /// Used for userinfo responses, which carry no `iss` of their own and are
    /// attributed to the identity token's issuer.
    pub fn from_json_with_issuer(payload: &Map<String, Value>, issuer: &str) -> Self {
        let mut set = Self::new();
        for (key, value) in payload {
            for v in json_claim_values(value) {
                set.push(Claim::new(key.clone(), v, issuer));
            }
        }
        set
    }

    /// Appends a claim.
    pub fn push(&mut self, claim: Claim) {
        self.claims.push(claim);
    }

    /// Appends every claim from `other` that is not already present with the
    /// same type and value. Existing claims are never replaced.
    pub fn merge_additive(&mut self, other: RawClaimSet) {
        for claim in other.claims {
            if !self.contains(&claim.claim_type, &claim.value) {
                self.claims.push(claim);
            }
        }
    }

    /// Removes every claim of the given type, returning the removed claims in
    /// their original order.
    pub fn take_type(&mut self, claim_type: &str) -> Vec<Claim> {
        let (taken, kept): (Vec<Claim>, Vec<Claim>) = std::mem::take(&mut self.claims)
            .into_iter()
            .partition(|c| c.claim_type == claim_type);
        self.claims = kept;
        taken
    }

    /// Returns `true` when any claim of the given type exists.
    pub fn has_type(&self, claim_type: &str) -> bool {
        self.claims.iter().any(|c| c.claim_type == claim_type)
    }

    /// Returns `true` when a claim with exactly this type and value exists.
    pub fn contains(&self, claim_type: &str, value: &str) -> bool {
        self.claims
            .iter()
            .any(|c| c.claim_type == claim_type && c.value == value)
    }

    /// Returns the values of every claim of the given type, in order.
    pub fn values_of(&self, claim_type: &str) -> Vec<&str> {
        self.claims
            .iter()
            .filter(|c| c.claim_type == claim_type)
            .map(|c| c.value.as_str())
            .collect()
    }

    /// Iterates the claims in order.
    pub fn iter(&self) -> impl Iterator<Item = &Claim> {
        self.claims.iter()
    }

    /// Number of claims.
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    /// Returns `true` when the set holds no claims.
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

impl FromIterator<Claim> for RawClaimSet {
    fn from_iter<I: IntoIterator<Item = Claim>>(iter: I) -> Self {
        Self {
            claims: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for RawClaimSet {
    type Item = Claim;
    type IntoIter = std::vec::IntoIter<Claim>;

    fn into_iter(self) -> Self::IntoIter {
        self.claims.into_iter()
    }
}

/// Returns the payload's `iss` string, or [`LOCAL_AUTHORITY`].
pub(crate) fn issuer_of(payload: &Map<String, Value>) -> String {
    payload
        .get("iss")
        .and_then(Value::as_str)
        .unwrap_or(LOCAL_AUTHORITY)
        .to_string()
}

/// Converts one JSON value into zero or more claim value strings.
pub(crate) fn json_claim_values(value: &Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::String(s) => vec![s.clone()],
        Value::Bool(_) | Value::Number(_) | Value::Object(_) => vec![value.to_string()],
        Value::Array(items) => items
            .iter()
            .flat_map(|item| match item {
                Value::Array(_) => vec![item.to_string()],
                other => json_claim_values(other),
            })
            .collect(),
    }
}
