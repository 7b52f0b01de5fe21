//! Claims model and transformation pipeline
//!
//! - [`types`]   -- `Claim` and the ordered `RawClaimSet`
//! - [`actions`] -- claim actions, default suppression map and the pipeline

pub mod actions;
pub mod types;

pub use actions::{apply, ClaimAction, ClaimActionPipeline, DefaultClaimMap};
pub use types::{Claim, RawClaimSet};
