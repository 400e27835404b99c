//! Tests for StepResult.

#[cfg(test)]
mod tests {
    use crate::core::{StepResult, StepStatus};
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn test_result_succeeded_with_outputs() {
        let mut outputs = BTreeMap::new();
        outputs.insert("DetectorId".to_string(), json!("det-1"));

        let result = StepResult::succeeded("GetDetectorId", outputs);
        assert_eq!(result.status, StepStatus::Succeeded);
        assert_eq!(result.get("DetectorId"), Some(&json!("det-1")));
        assert!(result.error.is_none());
    }

    #[test]
    fn test_result_branched() {
        let result = StepResult::branched("Choice", "Enable");
        assert_eq!(result.next_step.as_deref(), Some("Enable"));
        assert!(result.outputs.is_empty());
    }

    #[test]
    fn test_result_failed_and_tolerated() {
        let result = StepResult::failed("Invoke", "AccessDenied");
        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("AccessDenied"));

        let tolerated = result.tolerate();
        assert_eq!(tolerated.status, StepStatus::Tolerated);
        assert!(tolerated.status.continues());
    }

    #[test]
    fn test_tolerate_keeps_timeouts() {
        let result = StepResult::timed_out("Wait", "60s elapsed").tolerate();
        assert_eq!(result.status, StepStatus::TimedOut);
    }

    #[test]
    fn test_result_serialization_skips_empty_fields() {
        let value = serde_json::to_value(StepResult::empty("Sleep")).unwrap();
        assert_eq!(value, json!({"step": "Sleep", "status": "succeeded"}));
    }
}
