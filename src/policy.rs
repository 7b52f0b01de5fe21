//! Token validation policy and the resolved identity principal
//!
//! After the claim action pipeline has run, [`TokenValidationPolicy`] picks
//! the principal's display name and role set out of the claim set. Every
//! claim, including the name and role claims, is kept on the resulting
//! [`IdentityPrincipal`] for downstream authorization checks.
//!
//! # Name uniqueness
//!
//! When `require_unique_name` is set (the default) a claim set carrying two
//! or more distinct values of the name claim type fails with
//! [`FrontdoorError::IdentityResolution`]. With the flag cleared the last
//! value wins. Repeated identical values are not a conflict. A missing name
//! claim always fails.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::claims::RawClaimSet;
use crate::error::{FrontdoorError, Result};

/// Default name claim type.
pub const DEFAULT_NAME_CLAIM_TYPE: &str = "name";

/// Default role claim type.
pub const DEFAULT_ROLE_CLAIM_TYPE: &str = "role";

/// Maps token claim names onto the principal's name and role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenValidationPolicy {
    /// Claim type holding the display name
    pub name_claim_type: String,
    /// Claim type holding roles
    pub role_claim_type: String,
    /// Fail when the name claim carries more than one distinct value
    pub require_unique_name: bool,
}

impl Default for TokenValidationPolicy {
    fn default() -> Self {
        Self {
            name_claim_type: DEFAULT_NAME_CLAIM_TYPE.to_string(),
            role_claim_type: DEFAULT_ROLE_CLAIM_TYPE.to_string(),
            require_unique_name: true,
        }
    }
}

impl TokenValidationPolicy {
    /// Creates a policy with explicit name and role claim types.
    pub fn new(name_claim_type: impl Into<String>, role_claim_type: impl Into<String>) -> Self {
        Self {
            name_claim_type: name_claim_type.into(),
            role_claim_type: role_claim_type.into(),
            require_unique_name: true,
        }
    }

    /// Sets the uniqueness requirement on the name claim.
    pub fn with_unique_name(mut self, require_unique_name: bool) -> Self {
        self.require_unique_name = require_unique_name;
        self
    }

    /// Resolves a claim set into an [`IdentityPrincipal`].
    ///
    /// # Errors
    ///
    /// Returns [`FrontdoorError::IdentityResolution`] when the name claim is
    /// missing, or ambiguous while uniqueness is required.
    ///
    /// # Examples
    ///
    /// ```
    /// use frontdoor::claims::{Claim, RawClaimSet};
    /// use frontdoor::policy::TokenValidationPolicy;
    ///
    /// let claims: RawClaimSet = vec![
    ///     Claim::new("given_name", "Frank", "idp"),
    ///     Claim::new("role", "FreeUser", "idp"),
    /// ]
    /// .into_iter()
    /// .collect();
    ///
    /// let policy = TokenValidationPolicy::new("given_name", "role");
    /// let principal = policy.resolve_identity(&claims, "oidc").unwrap();
    /// assert_eq!(principal.name(), "Frank");
    /// assert!(principal.is_in_role("FreeUser"));
    /// ```
    pub fn resolve_identity(
        &self,
        claims: &RawClaimSet,
        authentication_type: &str,
    ) -> Result<IdentityPrincipal> {
        let values = claims.values_of(&self.name_claim_type);
        let mut names: Vec<&str> = Vec::new();
        for value in values.iter().copied() {
            if !names.contains(&value) {
                names.push(value);
            }
        }

        let name = match (names.as_slice(), values.last()) {
            ([], _) | (_, None) => {
                return Err(FrontdoorError::IdentityResolution(format!(
                    "no '{}' claim present",
                    self.name_claim_type
                ))
                .into())
            }
            ([only], _) => (*only).to_string(),
            (_, Some(last)) if !self.require_unique_name => {
                tracing::debug!(
                    name_claim_type = %self.name_claim_type,
                    candidates = names.len(),
                    "multiple name claims, last value wins"
                );
                (*last).to_string()
            }
            _ => {
                return Err(FrontdoorError::IdentityResolution(format!(
                    "{} conflicting '{}' claims",
                    names.len(),
                    self.name_claim_type
                ))
                .into())
            }
        };

        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for claim in claims.iter() {
            map.entry(claim.claim_type.clone())
                .or_default()
                .push(claim.value.clone());
        }

        Ok(IdentityPrincipal {
            authentication_type: authentication_type.to_string(),
            name,
            name_claim_type: self.name_claim_type.clone(),
            role_claim_type: self.role_claim_type.clone(),
            claims: map,
        })
    }
}

/// The canonical local identity.
///
/// Claim values are grouped by type; within a type they keep the order in
/// which the pipeline produced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityPrincipal {
    /// Scheme that authenticated the principal
    pub authentication_type: String,
    name: String,
    name_claim_type: String,
    role_claim_type: String,
    claims: BTreeMap<String, Vec<String>>,
}

impl IdentityPrincipal {
    /// The resolved display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Claim type the name was read from.
    pub fn name_claim_type(&self) -> &str {
        &self.name_claim_type
    }

    /// Claim type roles are read from.
    pub fn role_claim_type(&self) -> &str {
        &self.role_claim_type
    }

    /// Every role value, possibly empty.
    pub fn roles(&self) -> &[String] {
        self.claims
            .get(&self.role_claim_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Returns `true` when the principal carries the role.
    pub fn is_in_role(&self, role: &str) -> bool {
        self.roles().iter().any(|r| r == role)
    }

    /// First value of a claim type.
    pub fn find_first(&self, claim_type: &str) -> Option<&str> {
        self.claims
            .get(claim_type)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// All values of a claim type.
    pub fn claim_values(&self, claim_type: &str) -> &[String] {
        self.claims
            .get(claim_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every claim grouped by type.
    pub fn claims(&self) -> &BTreeMap<String, Vec<String>> {
        &self.claims
    }
}
