// Tier 2: Normalization and confidence-weighted fusion
//
// Contract: the normalizer turns one RawExtraction into NormalizedClaims; the
// fusion engine turns every NormalizedClaim of a gemstone into one FusionResult.

pub mod equivalence;
pub mod fusion_engine;
pub mod normalizer;
pub mod vocabulary;

pub use fusion_engine::FusionEngine;
pub use normalizer::ClaimNormalizer;
