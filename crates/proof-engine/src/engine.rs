//! Rule registry and claim dispatch.

use crate::claim::{Claim, ProofResult};
use crate::evidence::EvidenceBag;
use crate::rules;

/// Rule id carried by verdicts on claim types no registered rule handles.
pub const UNHANDLED_RULE_ID: &str = "unhandled";

/// A registered rule: a stable id, the claim types it claims authority over,
/// the dimensions it informs, and a pure evaluator.
///
/// Rules are plain values; adding one means adding a function and a
/// registration entry, nothing else changes.
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub rule_id: &'static str,
    pub claim_types: &'static [&'static str],
    pub dimensions: &'static [&'static str],
    pub evaluate: fn(&Claim, &EvidenceBag) -> ProofResult,
}

impl Rule {
    pub fn handles(&self, claim_type: &str) -> bool {
        self.claim_types.contains(&claim_type)
    }
}

/// Ordered collection of rules. Dispatch is first-match in registration
/// order, so evaluation over the same registry is deterministic.
#[derive(Debug, Default)]
pub struct RuleRegistry {
    rules: Vec<Rule>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The fixed catalog registered at startup.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(Rule {
            rule_id: "added_regression_test_v1",
            claim_types: &["added_regression_test"],
            dimensions: &["testing_discipline"],
            evaluate: rules::added_regression_test,
        });
        registry.register(Rule {
            rule_id: "debugging_effective_v1",
            claim_types: &["debugging_effective"],
            dimensions: &["debugging_method"],
            evaluate: rules::debugging_effective,
        });
        registry.register(Rule {
            rule_id: "testing_discipline_v1",
            claim_types: &["testing_discipline"],
            dimensions: &["testing_discipline"],
            evaluate: rules::testing_discipline,
        });
        registry.register(Rule {
            rule_id: "time_efficient_v1",
            claim_types: &["time_efficient"],
            dimensions: &["shipping_speed"],
            evaluate: rules::time_efficient,
        });
        registry.register(Rule {
            rule_id: "handles_edge_cases_v1",
            claim_types: &["handles_edge_cases"],
            dimensions: &["correctness"],
            evaluate: rules::handles_edge_cases,
        });
        registry
    }

    pub fn register(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// First rule handling the claim type, ties broken by registration order.
    pub fn rule_for(&self, claim_type: &str) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.handles(claim_type))
    }

    /// Evaluates one claim. A claim no rule handles yields an unproved
    /// verdict, never an error.
    pub fn evaluate(&self, claim: &Claim, bag: &EvidenceBag) -> ProofResult {
        match self.rule_for(&claim.claim_type) {
            Some(rule) => (rule.evaluate)(claim, bag),
            None => ProofResult::unproved(claim, UNHANDLED_RULE_ID, Vec::new(), "no rule available"),
        }
    }

    pub fn evaluate_claims(&self, claims: &[Claim], bag: &EvidenceBag) -> Vec<ProofResult> {
        claims
            .iter()
            .map(|claim| self.evaluate(claim, bag))
            .collect()
    }
}

/// Evaluates claims against the standard catalog. In-process entry point for
/// any consumer.
pub fn evaluate_claims(claims: &[Claim], bag: &EvidenceBag) -> Vec<ProofResult> {
    RuleRegistry::standard().evaluate_claims(claims, bag)
}
