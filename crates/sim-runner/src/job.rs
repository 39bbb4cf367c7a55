//! Job payloads pulled off the queue.

use serde::{Deserialize, Serialize};

/// A simulation job as enqueued by the control plane. Unknown fields are
/// ignored; a payload missing a required field is a producer protocol
/// violation and is dropped by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub run_id: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub simulation_id: String,
    #[serde(default)]
    pub candidate_code: String,
    #[serde(default)]
    pub candidate_writeup: String,
}

impl Job {
    pub fn parse(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_payload() {
        let job = Job::parse(
            r#"{"run_id":"run_1","type":"simulation","simulation_id":"bugfix_v1",
                "candidate_code":"print('x')","candidate_writeup":"notes",
                "application_id":"app_9"}"#,
        )
        .unwrap();

        assert_eq!(job.run_id, "run_1");
        assert_eq!(job.job_type, "simulation");
        assert_eq!(job.simulation_id, "bugfix_v1");
        assert_eq!(job.candidate_code, "print('x')");
    }

    #[test]
    fn submission_blobs_default_to_empty() {
        let job =
            Job::parse(r#"{"run_id":"r","type":"simulation","simulation_id":"s"}"#).unwrap();
        assert!(job.candidate_code.is_empty());
        assert!(job.candidate_writeup.is_empty());
    }

    #[test]
    fn missing_required_fields_fail_to_parse() {
        assert!(Job::parse(r#"{"type":"simulation"}"#).is_err());
        assert!(Job::parse("not json").is_err());
    }

    #[test]
    fn round_trips_through_the_queue_encoding() {
        let job = Job {
            run_id: "run_7".to_string(),
            job_type: "simulation".to_string(),
            simulation_id: "bugfix_v1".to_string(),
            candidate_code: "diff --git a b".to_string(),
            candidate_writeup: "# root cause".to_string(),
        };

        let encoded = serde_json::to_string(&job).unwrap();
        let decoded = Job::parse(&encoded).unwrap();
        assert_eq!(decoded.run_id, job.run_id);
        assert_eq!(decoded.job_type, job.job_type);
        assert_eq!(decoded.simulation_id, job.simulation_id);
        assert_eq!(decoded.candidate_code, job.candidate_code);
        assert_eq!(decoded.candidate_writeup, job.candidate_writeup);
    }
}
