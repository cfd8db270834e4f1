//! Test helpers shared across spark crates.

pub mod clock;
pub mod provider;
pub mod recommendations;

pub use clock::FixedClock;
pub use provider::{ScriptedCompletion, ScriptedEmbedding, candidate_json, unit_vector};
pub use recommendations::RecordingRecommendations;
