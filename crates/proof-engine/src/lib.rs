//! Deterministic proof engine for candidate claims.
//!
//! Evaluates structured claims about a candidate against the evidence bag a
//! simulation run produced: parsed metrics, artifact metadata, LLM tags and a
//! role-context manifest. Every rule is a pure function; evaluation performs
//! no I/O, reads no clock and produces a typed `proved`/`unproved` verdict
//! with the evidence refs a reviewer needs to retrace the decision.

pub mod claim;
pub mod engine;
pub mod evidence;
pub mod rules;

pub use claim::{Claim, EvidenceKind, EvidenceRef, ProofResult, ProofStatus};
pub use engine::{evaluate_claims, Rule, RuleRegistry, UNHANDLED_RULE_ID};
pub use evidence::{
    ArtifactMeta, ContextManifest, EvidenceBag, LlmTag, Lookup, MetricValue, Metrics, Pace,
    QualityBar,
};
