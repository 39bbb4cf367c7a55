//! Claims and their verdicts.

use serde::{Deserialize, Serialize};

use crate::evidence::MetricValue;

/// A typed statement about a candidate to be adjudicated.
///
/// Claim types are drawn from a closed vocabulary upstream, but the engine
/// keeps them as strings: an unknown type is a first-class input that yields
/// an unproved verdict, not a parse failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub claim_id: String,
    pub claim_type: String,
    pub dimension: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl Claim {
    pub fn new(
        claim_id: impl Into<String>,
        claim_type: impl Into<String>,
        dimension: impl Into<String>,
    ) -> Self {
        Self {
            claim_id: claim_id.into(),
            claim_type: claim_type.into(),
            dimension: dimension.into(),
            subject: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProofStatus {
    Proved,
    Unproved,
}

/// Where an evidence ref points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    Metric,
    Artifact,
    LlmTag,
}

/// A citation of one entity in the evidence bag.
///
/// Refs are recorded for every input a rule consulted, supporting or
/// contradicting, so a reviewer can see exactly what the engine saw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRef {
    #[serde(rename = "type")]
    pub kind: EvidenceKind,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub value: MetricValue,
}

impl EvidenceRef {
    pub fn metric(id: impl Into<String>, value: impl Into<MetricValue>) -> Self {
        Self {
            kind: EvidenceKind::Metric,
            id: id.into(),
            field: Some("value".to_string()),
            value: value.into(),
        }
    }

    pub fn artifact(name: impl Into<String>, content_type: impl Into<MetricValue>) -> Self {
        Self {
            kind: EvidenceKind::Artifact,
            id: name.into(),
            field: Some("content_type".to_string()),
            value: content_type.into(),
        }
    }

    pub fn llm_tag(tag: impl Into<String>, quote: impl Into<MetricValue>) -> Self {
        Self {
            kind: EvidenceKind::LlmTag,
            id: tag.into(),
            field: Some("evidence_quote".to_string()),
            value: quote.into(),
        }
    }
}

/// The immutable verdict on one claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofResult {
    pub claim_id: String,
    pub status: ProofStatus,
    pub evidence: Vec<EvidenceRef>,
    pub rationale: String,
    pub rule_id: String,
}

impl ProofResult {
    pub fn proved(
        claim: &Claim,
        rule_id: &str,
        evidence: Vec<EvidenceRef>,
        rationale: impl Into<String>,
    ) -> Self {
        debug_assert!(!evidence.is_empty(), "a proved verdict must cite evidence");
        Self {
            claim_id: claim.claim_id.clone(),
            status: ProofStatus::Proved,
            evidence,
            rationale: rationale.into(),
            rule_id: rule_id.to_string(),
        }
    }

    pub fn unproved(
        claim: &Claim,
        rule_id: &str,
        evidence: Vec<EvidenceRef>,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            claim_id: claim.claim_id.clone(),
            status: ProofStatus::Unproved,
            evidence,
            rationale: rationale.into(),
            rule_id: rule_id.to_string(),
        }
    }

    pub fn is_proved(&self) -> bool {
        self.status == ProofStatus::Proved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evidence_ref_serializes_with_type_tag() {
        let reference = EvidenceRef::metric("tests_passed", true);
        let value = serde_json::to_value(&reference).unwrap();
        assert_eq!(value["type"], "metric");
        assert_eq!(value["id"], "tests_passed");
        assert_eq!(value["value"], true);
    }

    #[test]
    fn claim_parses_with_unknown_fields_ignored() {
        let claim: Claim = serde_json::from_str(
            r#"{"claim_id":"c1","claim_type":"time_efficient","dimension":"shipping_speed","extra":42}"#,
        )
        .unwrap();
        assert_eq!(claim.claim_type, "time_efficient");
        assert!(claim.subject.is_none());
    }

    #[test]
    fn proof_status_uses_lowercase_wire_form() {
        assert_eq!(
            serde_json::to_string(&ProofStatus::Unproved).unwrap(),
            "\"unproved\""
        );
    }
}
