use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::domain::error::{AppError, Result};
use crate::domain::test_case::TestCase;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct SuiteRequest {
    #[validate(length(min = 1, max = 200))]
    pub suite_name: String,
    #[validate(length(max = 2000))]
    pub suite_description: String,
    #[validate(length(min = 1))]
    pub test_cases: Vec<TestCase>,
    pub include_invalid: bool,
}

impl SuiteRequest {
    pub fn new(
        suite_name: &str,
        suite_description: &str,
        test_cases: Vec<TestCase>,
        include_invalid: bool,
    ) -> Self {
        Self {
            suite_name: suite_name.trim().to_string(),
            suite_description: suite_description.trim().to_string(),
            test_cases,
            include_invalid,
        }
    }

    /// Runs the derive rules and maps the first failure to a readable
    /// message.
    pub fn check(&self) -> Result<()> {
        self.validate().map_err(|errors| {
            let fields = errors.field_errors();
            let message = if fields.contains_key("suite_name") {
                "Suite name is required (max 200 characters)."
            } else if fields.contains_key("test_cases") {
                "There are no cases to save in the suite."
            } else {
                "Suite description is too long."
            };
            AppError::ValidationError(message.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_name_rejected() {
        let request = SuiteRequest::new("   ", "", vec![TestCase::new("a", "A", true)], false);
        let err = request.check().unwrap_err();
        assert!(matches!(err, AppError::ValidationError(msg) if msg.contains("Suite name")));
    }

    #[test]
    fn test_empty_case_list_rejected() {
        let request = SuiteRequest::new("Smoke", "", Vec::new(), false);
        let err = request.check().unwrap_err();
        assert!(matches!(err, AppError::ValidationError(msg) if msg.contains("no cases")));
    }

    #[test]
    fn test_valid_request() {
        let request = SuiteRequest::new(" Smoke ", "nightly", vec![TestCase::new("a", "A", true)], true);
        assert!(request.check().is_ok());
        assert_eq!(request.suite_name, "Smoke");
    }
}
