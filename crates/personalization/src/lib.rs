//! Message personalization: deterministic template rendering over
//! contact fields, plus an optional best-effort AI variation pass that
//! can never fail a dispatch.

pub mod templating;
pub mod variation;

pub use templating::{extract_template_variables, interpolate};
pub use variation::{AiVariation, MessagePersonalizer, VariationRequest};
