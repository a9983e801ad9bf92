use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

use crate::domain::error::{AppError, Result};
use crate::domain::test_case::{
    AnalysisSummary, CaseAssessment, CaseExecutionResult, CasePatch, TestCase,
};

/// Store shared between the editor and execution reconciliation.
pub type SharedCaseStore = Arc<Mutex<BulkCaseStore>>;

/// The cases of the current batch, in upload order.
#[derive(Debug, Default, Clone)]
pub struct BulkCaseStore {
    cases: Vec<TestCase>,
}

impl BulkCaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedCaseStore {
        Arc::new(Mutex::new(self))
    }

    /// Replaces the whole batch. An empty list is ignored and reported as
    /// `false` so the caller can keep the previous batch on screen.
    pub fn load(&mut self, cases: Vec<TestCase>) -> bool {
        if cases.is_empty() {
            warn!("Ignoring empty case list, keeping current batch");
            return false;
        }
        info!(
            cases = cases.len(),
            valid = cases.iter().filter(|case| case.es_valido).count(),
            "Loaded case batch"
        );
        self.cases = cases;
        true
    }

    pub fn clear(&mut self) {
        self.cases.clear();
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn all_cases(&self) -> impl Iterator<Item = &TestCase> + Clone + '_ {
        self.cases.iter()
    }

    pub fn valid_cases(&self) -> impl Iterator<Item = &TestCase> + Clone + '_ {
        self.cases.iter().filter(|case| case.es_valido)
    }

    pub fn invalid_cases(&self) -> impl Iterator<Item = &TestCase> + Clone + '_ {
        self.cases.iter().filter(|case| !case.es_valido)
    }

    pub fn get(&self, id: &str) -> Option<&TestCase> {
        self.cases.iter().find(|case| case.id == id)
    }

    pub fn summary(&self) -> AnalysisSummary {
        AnalysisSummary::from_cases(self.all_cases())
    }

    pub fn update_case(&mut self, id: &str, patch: &CasePatch) -> Result<()> {
        let case = self.case_mut(id, "update")?;
        patch.apply_to(case);
        Ok(())
    }

    pub fn attach_result(&mut self, id: &str, result: CaseExecutionResult) -> Result<()> {
        let case = self.case_mut(id, "attach result")?;
        case.execution_result = Some(result);
        Ok(())
    }

    pub fn apply_assessment(&mut self, id: &str, assessment: CaseAssessment) -> Result<()> {
        let case = self.case_mut(id, "apply assessment")?;
        case.apply_assessment(assessment);
        Ok(())
    }

    fn case_mut(&mut self, id: &str, action: &str) -> Result<&mut TestCase> {
        match self.cases.iter_mut().find(|case| case.id == id) {
            Some(case) => Ok(case),
            None => {
                error!(case_id = %id, action, "Case not found in current batch");
                Err(AppError::NotFound(format!("Case '{}' is not in the current batch", id)))
            }
        }
    }
}
