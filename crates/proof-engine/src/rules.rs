//! The initial rule catalog for backend-engineer simulation runs.
//!
//! Each evaluator is a pure function from `(claim, evidence bag)` to a
//! verdict. Present metrics that a rule consults are always cited as evidence
//! refs; metrics that are absent (or carry the wrong type) can only be named
//! in the rationale, since a ref must point at an entity actually in the bag.

use crate::claim::{Claim, EvidenceRef, ProofResult};
use crate::evidence::{EvidenceBag, Lookup, Pace, QualityBar};

pub const ROOT_CAUSE_TAG: &str = "root_cause_identified";

/// Maximum `time_to_green_seconds` tolerated for a pace, in seconds.
pub fn time_to_green_threshold(pace: Pace) -> f64 {
    match pace {
        Pace::High => 2400.0,
        Pace::Low => 3600.0,
        Pace::Medium | Pace::Unknown => 3000.0,
    }
}

/// Minimum tolerated `coverage_delta` (percentage points) for a quality bar.
pub fn coverage_floor(quality_bar: QualityBar) -> f64 {
    match quality_bar {
        QualityBar::High => 0.0,
        QualityBar::Low => -10.0,
        QualityBar::Medium | QualityBar::Unknown => -5.0,
    }
}

/// Gate shared by several rules: the suite must be green.
///
/// Returns the ref to cite on success, or a ready-made unproved verdict.
fn require_tests_passed(
    claim: &Claim,
    bag: &EvidenceBag,
    rule_id: &str,
    failure_rationale: &str,
) -> Result<EvidenceRef, ProofResult> {
    match bag.metrics.flag("tests_passed") {
        Lookup::Found(true) => Ok(EvidenceRef::metric("tests_passed", true)),
        Lookup::Found(false) => Err(ProofResult::unproved(
            claim,
            rule_id,
            vec![EvidenceRef::metric("tests_passed", false)],
            failure_rationale,
        )),
        Lookup::Missing | Lookup::WrongType => Err(ProofResult::unproved(
            claim,
            rule_id,
            Vec::new(),
            format!("{failure_rationale} (tests_passed not recorded)"),
        )),
    }
}

/// `added_regression_test`: proved when the suite is green and either the
/// diff analysis flagged a new test outright, or test files changed and the
/// test count went up.
pub fn added_regression_test(claim: &Claim, bag: &EvidenceBag) -> ProofResult {
    const RULE_ID: &str = "added_regression_test_v1";

    let mut evidence = Vec::new();
    match require_tests_passed(
        claim,
        bag,
        RULE_ID,
        "Tests did not pass - cannot verify regression test",
    ) {
        Ok(reference) => evidence.push(reference),
        Err(verdict) => return verdict,
    }

    if let Lookup::Found(true) = bag.metrics.flag("test_added") {
        evidence.push(EvidenceRef::metric("test_added", true));
        return ProofResult::proved(
            claim,
            RULE_ID,
            evidence,
            "Candidate added a regression test, confirmed by diff analysis and a green suite",
        );
    }

    if let Lookup::Found(files_changed) = bag.metrics.count("test_files_changed") {
        if files_changed > 0 {
            evidence.push(EvidenceRef::metric("test_files_changed", files_changed));
            if let Lookup::Found(added) = bag.metrics.count("tests_added_count") {
                if added > 0 {
                    evidence.push(EvidenceRef::metric("tests_added_count", added));
                    return ProofResult::proved(
                        claim,
                        RULE_ID,
                        evidence,
                        format!("Candidate modified test files and added {added} test(s)"),
                    );
                }
            }
        }
    }

    ProofResult::unproved(
        claim,
        RULE_ID,
        evidence,
        "Could not verify that candidate added a regression test",
    )
}

/// `debugging_effective`: requires a green suite, then either an LLM
/// root-cause tag or evidence that there was a failure to repair.
///
/// A `time_to_green_seconds` beyond the pace threshold is recorded as
/// evidence but does not invalidate a proved verdict in this catalog.
pub fn debugging_effective(claim: &Claim, bag: &EvidenceBag) -> ProofResult {
    const RULE_ID: &str = "debugging_effective_v1";

    let mut evidence = Vec::new();
    match require_tests_passed(claim, bag, RULE_ID, "Tests did not pass - bug was not fixed") {
        Ok(reference) => evidence.push(reference),
        Err(verdict) => return verdict,
    }

    if let Lookup::Found(seconds) = bag.metrics.number("time_to_green_seconds") {
        evidence.push(EvidenceRef::metric("time_to_green_seconds", seconds));
    }

    if let Some(tag) = bag.llm_tag(ROOT_CAUSE_TAG) {
        evidence.push(EvidenceRef::llm_tag(ROOT_CAUSE_TAG, tag.evidence_quote.as_str()));
        return ProofResult::proved(
            claim,
            RULE_ID,
            evidence,
            "Candidate fixed the bug and explained the root cause",
        );
    }

    if let Lookup::Found(failed_before) = bag.metrics.count("failed_tests_before") {
        if failed_before > 0 {
            evidence.push(EvidenceRef::metric("failed_tests_before", failed_before));
            return ProofResult::proved(
                claim,
                RULE_ID,
                evidence,
                format!("Candidate repaired {failed_before} initially failing test(s)"),
            );
        }
        evidence.push(EvidenceRef::metric("failed_tests_before", failed_before));
    }

    ProofResult::unproved(
        claim,
        RULE_ID,
        evidence,
        "Tests pass but could not verify debugging process (no root cause explanation, no repaired failure)",
    )
}

/// `testing_discipline`: unproved when skipped tests were introduced or
/// coverage fell below the quality-bar floor; otherwise proved iff tests were
/// added. Merely keeping the suite green proves nothing for this dimension.
pub fn testing_discipline(claim: &Claim, bag: &EvidenceBag) -> ProofResult {
    const RULE_ID: &str = "testing_discipline_v1";

    let mut evidence = Vec::new();

    let tests_added = match bag.metrics.count("tests_added_count") {
        Lookup::Found(added) => {
            evidence.push(EvidenceRef::metric("tests_added_count", added));
            added
        }
        Lookup::Missing | Lookup::WrongType => 0,
    };

    if let Lookup::Found(skipped) = bag.metrics.count("skipped_tests_added") {
        if skipped > 0 {
            evidence.push(EvidenceRef::metric("skipped_tests_added", skipped));
            return ProofResult::unproved(
                claim,
                RULE_ID,
                evidence,
                format!("Candidate introduced {skipped} skipped test(s)"),
            );
        }
    }

    if let Lookup::Found(delta) = bag.metrics.number("coverage_delta") {
        evidence.push(EvidenceRef::metric("coverage_delta", delta));
        let floor = coverage_floor(bag.com.quality_bar);
        if delta < floor {
            return ProofResult::unproved(
                claim,
                RULE_ID,
                evidence,
                format!("Coverage delta {delta} fell below the acceptable floor of {floor}"),
            );
        }
    }

    if tests_added > 0 {
        return ProofResult::proved(
            claim,
            RULE_ID,
            evidence,
            format!("Candidate added {tests_added} test(s) with no skipped tests"),
        );
    }

    if let Lookup::Found(true) = bag.metrics.flag("tests_passed") {
        evidence.push(EvidenceRef::metric("tests_passed", true));
    }

    ProofResult::unproved(
        claim,
        RULE_ID,
        evidence,
        "Could not verify testing discipline - no new tests added",
    )
}

/// `time_efficient`: proved iff `time_to_green_seconds` is recorded and
/// within the pace threshold. A missing time is unproved, not an error.
pub fn time_efficient(claim: &Claim, bag: &EvidenceBag) -> ProofResult {
    const RULE_ID: &str = "time_efficient_v1";

    let seconds = match bag.metrics.number("time_to_green_seconds") {
        Lookup::Found(seconds) => seconds,
        Lookup::Missing | Lookup::WrongType => {
            return ProofResult::unproved(
                claim,
                RULE_ID,
                Vec::new(),
                "Time to completion not recorded",
            );
        }
    };

    let evidence = vec![EvidenceRef::metric("time_to_green_seconds", seconds)];
    let threshold = time_to_green_threshold(bag.com.pace);
    let minutes = (seconds / 60.0) as i64;

    if seconds <= threshold {
        ProofResult::proved(
            claim,
            RULE_ID,
            evidence,
            format!("Candidate completed in {minutes} minute(s), within the pace threshold"),
        )
    } else {
        ProofResult::unproved(
            claim,
            RULE_ID,
            evidence,
            format!("Completion time ({minutes} min) exceeded the pace threshold"),
        )
    }
}

/// `handles_edge_cases`: requires a green suite with zero failing tests.
/// `total_tests` is cited when present but does not gate the verdict.
pub fn handles_edge_cases(claim: &Claim, bag: &EvidenceBag) -> ProofResult {
    const RULE_ID: &str = "handles_edge_cases_v1";

    let mut evidence = Vec::new();
    match require_tests_passed(
        claim,
        bag,
        RULE_ID,
        "Tests did not pass - edge cases may not be handled",
    ) {
        Ok(reference) => evidence.push(reference),
        Err(verdict) => return verdict,
    }

    // A green suite with no recorded failure count is treated as zero failures.
    let failed = bag.metrics.count("failed_tests_count");
    if let Lookup::Found(count) = failed {
        evidence.push(EvidenceRef::metric("failed_tests_count", count));
        if count > 0 {
            return ProofResult::unproved(
                claim,
                RULE_ID,
                evidence,
                format!("{count} test(s) still failing"),
            );
        }
    }

    let rationale = match bag.metrics.count("total_tests") {
        Lookup::Found(total) if total > 0 => {
            evidence.push(EvidenceRef::metric("total_tests", total));
            format!("All {total} tests pass including edge case tests")
        }
        _ => "All tests pass including edge case tests".to_string(),
    };

    ProofResult::proved(claim, RULE_ID, evidence, rationale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::{LlmTag, MetricValue, Metrics};

    fn claim(claim_type: &str) -> Claim {
        Claim::new("c1", claim_type, "dim")
    }

    fn bag_with(metrics: Metrics) -> EvidenceBag {
        EvidenceBag {
            metrics,
            ..EvidenceBag::default()
        }
    }

    #[test]
    fn regression_test_proved_via_test_added_flag() {
        let mut metrics = Metrics::new();
        metrics.insert("tests_passed", true);
        metrics.insert("test_added", true);

        let result = added_regression_test(&claim("added_regression_test"), &bag_with(metrics));
        assert!(result.is_proved());
        assert!(result.evidence.iter().any(|r| r.id == "test_added"));
    }

    #[test]
    fn regression_test_proved_via_changed_files_and_count() {
        let mut metrics = Metrics::new();
        metrics.insert("tests_passed", true);
        metrics.insert("test_files_changed", 1i64);
        metrics.insert("tests_added_count", 2i64);

        let result = added_regression_test(&claim("added_regression_test"), &bag_with(metrics));
        assert!(result.is_proved());
    }

    #[test]
    fn regression_test_unproved_without_green_suite() {
        let mut metrics = Metrics::new();
        metrics.insert("tests_passed", false);
        metrics.insert("test_added", true);

        let result = added_regression_test(&claim("added_regression_test"), &bag_with(metrics));
        assert!(!result.is_proved());
        assert!(result.evidence.iter().any(|r| r.id == "tests_passed"));
    }

    #[test]
    fn debugging_proved_via_root_cause_tag() {
        let mut metrics = Metrics::new();
        metrics.insert("tests_passed", true);
        let mut bag = bag_with(metrics);
        bag.llm_tags.push(LlmTag {
            tag: ROOT_CAUSE_TAG.to_string(),
            evidence_quote: "the cache key omitted the tenant id".to_string(),
        });

        let result = debugging_effective(&claim("debugging_effective"), &bag);
        assert!(result.is_proved());
        assert!(result.evidence.iter().any(|r| r.id == ROOT_CAUSE_TAG));
    }

    #[test]
    fn debugging_proved_via_repaired_failures() {
        let mut metrics = Metrics::new();
        metrics.insert("tests_passed", true);
        metrics.insert("failed_tests_before", 3i64);

        let result = debugging_effective(&claim("debugging_effective"), &bag_with(metrics));
        assert!(result.is_proved());
    }

    #[test]
    fn debugging_over_threshold_still_proves_but_cites_time() {
        let mut metrics = Metrics::new();
        metrics.insert("tests_passed", true);
        metrics.insert("failed_tests_before", 1i64);
        metrics.insert("time_to_green_seconds", 9999i64);

        let result = debugging_effective(&claim("debugging_effective"), &bag_with(metrics));
        assert!(result.is_proved());
        assert!(result
            .evidence
            .iter()
            .any(|r| r.id == "time_to_green_seconds"));
    }

    #[test]
    fn discipline_unproved_when_skipped_tests_introduced() {
        let mut metrics = Metrics::new();
        metrics.insert("tests_passed", true);
        metrics.insert("tests_added_count", 2i64);
        metrics.insert("skipped_tests_added", 1i64);
        metrics.insert("coverage_delta", 0i64);

        let result = testing_discipline(&claim("testing_discipline"), &bag_with(metrics));
        assert!(!result.is_proved());
        assert!(result
            .evidence
            .iter()
            .any(|r| r.id == "skipped_tests_added" && r.value == MetricValue::Int(1)));
    }

    #[test]
    fn discipline_respects_quality_bar_floor() {
        let mut metrics = Metrics::new();
        metrics.insert("tests_passed", true);
        metrics.insert("tests_added_count", 1i64);
        metrics.insert("coverage_delta", -8i64);
        let mut bag = bag_with(metrics);
        bag.com.quality_bar = QualityBar::High;

        let result = testing_discipline(&claim("testing_discipline"), &bag);
        assert!(!result.is_proved());
        assert!(result.evidence.iter().any(|r| r.id == "coverage_delta"));
    }

    #[test]
    fn discipline_unproved_when_green_but_nothing_added() {
        let mut metrics = Metrics::new();
        metrics.insert("tests_passed", true);

        let result = testing_discipline(&claim("testing_discipline"), &bag_with(metrics));
        assert!(!result.is_proved());
    }

    #[test]
    fn time_efficiency_uses_pace_thresholds() {
        let mut metrics = Metrics::new();
        metrics.insert("time_to_green_seconds", 3300i64);
        let mut bag = bag_with(metrics);

        bag.com.pace = Pace::High;
        let result = time_efficient(&claim("time_efficient"), &bag);
        assert!(!result.is_proved());

        bag.com.pace = Pace::Low;
        let result = time_efficient(&claim("time_efficient"), &bag);
        assert!(result.is_proved());
    }

    #[test]
    fn time_efficiency_missing_time_is_unproved_not_an_error() {
        let result = time_efficient(&claim("time_efficient"), &bag_with(Metrics::new()));
        assert!(!result.is_proved());
        assert!(result.evidence.is_empty());
        assert_eq!(result.rationale, "Time to completion not recorded");
    }

    #[test]
    fn unknown_pace_falls_back_to_medium_threshold() {
        let mut metrics = Metrics::new();
        metrics.insert("time_to_green_seconds", 2900i64);
        let mut bag = bag_with(metrics);
        bag.com.pace = Pace::Unknown;

        let result = time_efficient(&claim("time_efficient"), &bag);
        assert!(result.is_proved());
    }

    #[test]
    fn edge_cases_unproved_while_failures_remain() {
        let mut metrics = Metrics::new();
        metrics.insert("tests_passed", true);
        metrics.insert("failed_tests_count", 2i64);

        let result = handles_edge_cases(&claim("handles_edge_cases"), &bag_with(metrics));
        assert!(!result.is_proved());
    }

    #[test]
    fn edge_cases_notes_total_tests_without_gating() {
        let mut metrics = Metrics::new();
        metrics.insert("tests_passed", true);
        metrics.insert("failed_tests_count", 0i64);
        metrics.insert("total_tests", 42i64);

        let result = handles_edge_cases(&claim("handles_edge_cases"), &bag_with(metrics));
        assert!(result.is_proved());
        assert!(result.evidence.iter().any(|r| r.id == "total_tests"));
    }
}
