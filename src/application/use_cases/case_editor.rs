use std::sync::{Arc, PoisonError};
use tracing::{debug, info};

use crate::application::use_cases::case_store::SharedCaseStore;
use crate::application::use_cases::notification_center::NotificationCenter;
use crate::domain::error::{AppError, Result};
use crate::domain::test_case::{CaseAssessment, CasePatch, TestCase};
use crate::infrastructure::qa_pilot::QaPilotApi;

const SOURCE: &str = "editor";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EditorState {
    #[default]
    Idle,
    Single {
        case_id: String,
    },
    /// Ids are the ones captured when the sequence started; later changes
    /// to the store do not reshape it.
    Sequence {
        case_ids: Vec<String>,
        cursor: usize,
    },
}

/// Edits one case at a time, either on its own or while stepping through
/// an ordered list of cases.
pub struct CaseEditor {
    api: Arc<dyn QaPilotApi>,
    store: SharedCaseStore,
    notifications: NotificationCenter,
    state: EditorState,
}

impl CaseEditor {
    pub fn new(
        api: Arc<dyn QaPilotApi>,
        store: SharedCaseStore,
        notifications: NotificationCenter,
    ) -> Self {
        Self {
            api,
            store,
            notifications,
            state: EditorState::Idle,
        }
    }

    pub fn state(&self) -> &EditorState {
        &self.state
    }

    pub fn current_id(&self) -> Option<&str> {
        match &self.state {
            EditorState::Idle => None,
            EditorState::Single { case_id } => Some(case_id.as_str()),
            EditorState::Sequence { case_ids, cursor } => case_ids.get(*cursor).map(String::as_str),
        }
    }

    /// Current case as stored right now.
    pub fn current(&self) -> Option<TestCase> {
        let id = self.current_id()?;
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// `(cursor, length)` while stepping through a sequence.
    pub fn position(&self) -> Option<(usize, usize)> {
        match &self.state {
            EditorState::Sequence { case_ids, cursor } => Some((*cursor, case_ids.len())),
            _ => None,
        }
    }

    pub fn edit(&mut self, case_id: &str) -> Result<TestCase> {
        let case = self.lookup(case_id)?;
        debug!(case_id = %case_id, "Editing case");
        self.state = EditorState::Single {
            case_id: case_id.to_string(),
        };
        Ok(case)
    }

    pub fn edit_sequence(&mut self, case_ids: Vec<String>) -> Result<TestCase> {
        let Some(first) = case_ids.first() else {
            return self.fail(AppError::ValidationError(
                "There are no cases to edit.".to_string(),
            ));
        };
        let case = self.lookup(first)?;
        info!(cases = case_ids.len(), "Started editing sequence");
        self.state = EditorState::Sequence {
            case_ids,
            cursor: 0,
        };
        Ok(case)
    }

    /// Steps through every case that is invalid at this moment.
    pub fn edit_all_problematic(&mut self) -> Result<TestCase> {
        let case_ids: Vec<String> = self
            .store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .invalid_cases()
            .map(|case| case.id.clone())
            .collect();
        if case_ids.is_empty() {
            return self.fail(AppError::ValidationError(
                "There are no problematic cases to edit.".to_string(),
            ));
        }
        self.edit_sequence(case_ids)
    }

    /// Moves forward. No-op at the last case or outside a sequence.
    pub fn next(&mut self) -> bool {
        match &mut self.state {
            EditorState::Sequence { case_ids, cursor } if *cursor + 1 < case_ids.len() => {
                *cursor += 1;
                true
            }
            _ => false,
        }
    }

    /// Moves back. No-op at the first case or outside a sequence.
    pub fn previous(&mut self) -> bool {
        match &mut self.state {
            EditorState::Sequence { cursor, .. } if *cursor > 0 => {
                *cursor -= 1;
                true
            }
            _ => false,
        }
    }

    /// Stores the text edits. Validity is left as it was; use
    /// [`CaseEditor::reanalyze`] to have the server judge the new text.
    pub fn save(&mut self, patch: &CasePatch) -> Result<()> {
        let case_id = self.require_current()?;
        let updated = self
            .store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .update_case(&case_id, patch);
        if let Err(err) = updated {
            return self.fail(err);
        }
        self.notifications.success(SOURCE, "Case updated.");
        Ok(())
    }

    /// Sends the edited case for validation. On success the edits and the
    /// new verdict are stored; on failure the case is left untouched.
    pub async fn reanalyze(&mut self, patch: &CasePatch) -> Result<CaseAssessment> {
        let case_id = self.require_current()?;
        let mut candidate = self.lookup(&case_id)?;
        patch.apply_to(&mut candidate);
        candidate.execution_result = None;

        let analyzed = match self.api.reanalyze_case(&candidate).await {
            Ok(analyzed) => analyzed,
            Err(err) => return self.fail(err),
        };
        let assessment = CaseAssessment::from(&analyzed);

        let stored = {
            let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
            store
                .update_case(&case_id, patch)
                .and_then(|_| store.apply_assessment(&case_id, assessment.clone()))
        };
        if let Err(err) = stored {
            return self.fail(err);
        }

        info!(
            case_id = %case_id,
            valid = assessment.es_valido,
            problems = assessment.problemas.len(),
            "Case reanalyzed"
        );
        if assessment.es_valido {
            self.notifications
                .success(SOURCE, "Case is now valid and ready to execute.");
        } else {
            self.notifications.warning(
                SOURCE,
                &format!(
                    "Case still has {} problem(s) to fix.",
                    assessment.problemas.len()
                ),
            );
        }
        Ok(assessment)
    }

    pub fn finish(&mut self) {
        if self.state != EditorState::Idle {
            debug!("Editing finished");
        }
        self.state = EditorState::Idle;
    }

    pub fn cancel(&mut self) {
        if self.state != EditorState::Idle {
            debug!("Editing cancelled");
        }
        self.state = EditorState::Idle;
    }

    fn require_current(&self) -> Result<String> {
        match self.current_id() {
            Some(id) => Ok(id.to_string()),
            None => self.fail(AppError::ValidationError(
                "No case is being edited.".to_string(),
            )),
        }
    }

    fn lookup(&self, case_id: &str) -> Result<TestCase> {
        let found = self
            .store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(case_id)
            .cloned();
        match found {
            Some(case) => Ok(case),
            None => self.fail(AppError::NotFound(format!(
                "Case '{}' is not in the current batch",
                case_id
            ))),
        }
    }

    fn fail<T>(&self, err: AppError) -> Result<T> {
        self.notifications.report_error(SOURCE, &err);
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::use_cases::case_store::BulkCaseStore;
    use crate::application::use_cases::test_support::FakeApi;
    use crate::domain::notification::NotificationLevel;

    fn setup(api: FakeApi) -> (Arc<FakeApi>, SharedCaseStore, NotificationCenter, CaseEditor) {
        let api = Arc::new(api);
        let mut store = BulkCaseStore::new();
        let mut broken = TestCase::new("TC-2", "Search", false);
        broken.problemas = vec!["Missing steps".to_string()];
        broken.sugerencias = vec!["Describe each click".to_string()];
        store.load(vec![
            TestCase::new("TC-1", "Login", true),
            broken,
            TestCase::new("TC-3", "Checkout", false),
            TestCase::new("TC-4", "Profile", false),
        ]);
        let store = store.shared();
        let notifications = NotificationCenter::default();
        let editor = CaseEditor::new(api.clone(), Arc::clone(&store), notifications.clone());
        (api, store, notifications, editor)
    }

    fn steps_patch() -> CasePatch {
        CasePatch {
            pasos: Some("1. Open search\n2. Type 'shoes'".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_sequence_bounds_are_no_ops() {
        let (_api, _store, _notes, mut editor) = setup(FakeApi::default());
        editor.edit_all_problematic().unwrap();
        assert_eq!(editor.position(), Some((0, 3)));

        assert!(!editor.previous());
        assert_eq!(editor.current_id(), Some("TC-2"));

        assert!(editor.next());
        assert!(editor.next());
        assert!(!editor.next());
        assert_eq!(editor.position(), Some((2, 3)));
        assert_eq!(editor.current_id(), Some("TC-4"));

        assert!(editor.previous());
        assert_eq!(editor.current_id(), Some("TC-3"));
    }

    #[test]
    fn test_navigation_outside_sequence() {
        let (_api, _store, _notes, mut editor) = setup(FakeApi::default());
        editor.edit("TC-1").unwrap();
        assert!(!editor.next());
        assert!(!editor.previous());
        editor.finish();
        assert_eq!(editor.state(), &EditorState::Idle);
        assert!(editor.current().is_none());
    }

    #[test]
    fn test_save_keeps_validity() {
        let (_api, store, notes, mut editor) = setup(FakeApi::default());
        editor.edit("TC-2").unwrap();

        editor.save(&steps_patch()).unwrap();

        let store = store.lock().unwrap();
        let case = store.get("TC-2").unwrap();
        assert!(case.pasos.contains("shoes"));
        assert!(!case.es_valido);
        assert_eq!(case.problemas, vec!["Missing steps".to_string()]);
        assert_eq!(notes.count(NotificationLevel::Success), 1);
        assert_eq!(editor.current_id(), Some("TC-2"));
    }

    #[test]
    fn test_save_without_open_case() {
        let (_api, _store, notes, mut editor) = setup(FakeApi::default());
        let err = editor.save(&steps_patch()).unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
        assert_eq!(notes.count(NotificationLevel::Danger), 1);
    }

    #[tokio::test]
    async fn test_reanalyze_failure_leaves_case_untouched() {
        let api = FakeApi::default();
        *api.reanalysis.lock().unwrap() = Some(Err(AppError::NetworkError(
            "reanalyze failed (500): Internal Server Error".to_string(),
        )));
        let (_api, store, notes, mut editor) = setup(api);
        let before = store.lock().unwrap().get("TC-2").cloned().unwrap();
        editor.edit("TC-2").unwrap();

        let err = editor.reanalyze(&steps_patch()).await.unwrap_err();

        assert!(matches!(err, AppError::NetworkError(_)));
        let after = store.lock().unwrap().get("TC-2").cloned().unwrap();
        assert_eq!(after, before);
        assert_eq!(notes.count(NotificationLevel::Danger), 1);
        assert_eq!(notes.history().len(), 1);
    }

    #[tokio::test]
    async fn test_reanalyze_success_applies_edits_and_verdict() {
        let api = FakeApi::default();
        let mut analyzed = TestCase::new("TC-2", "Search", true);
        analyzed.instrucciones_qa_pilot = "Open /search and type shoes".to_string();
        *api.reanalysis.lock().unwrap() = Some(Ok(analyzed));
        let (api, store, notes, mut editor) = setup(api);
        editor.edit_all_problematic().unwrap();

        let assessment = editor.reanalyze(&steps_patch()).await.unwrap();

        assert!(assessment.es_valido);
        let sent = api.reanalyzed.lock().unwrap();
        assert!(sent[0].pasos.contains("shoes"));
        let store = store.lock().unwrap();
        let case = store.get("TC-2").unwrap();
        assert!(case.es_valido);
        assert!(case.problemas.is_empty());
        assert!(case.pasos.contains("shoes"));
        assert_eq!(case.instrucciones_qa_pilot, "Open /search and type shoes");
        assert_eq!(notes.count(NotificationLevel::Success), 1);
        assert_eq!(editor.position(), Some((0, 3)));
    }

    #[test]
    fn test_sequence_is_a_snapshot() {
        let (_api, store, _notes, mut editor) = setup(FakeApi::default());
        editor.edit_all_problematic().unwrap();

        store
            .lock()
            .unwrap()
            .apply_assessment(
                "TC-3",
                CaseAssessment {
                    es_valido: true,
                    problemas: Vec::new(),
                    sugerencias: Vec::new(),
                    instrucciones_qa_pilot: None,
                    url_extraida: None,
                },
            )
            .unwrap();

        assert!(editor.next());
        assert_eq!(editor.current_id(), Some("TC-3"));
        assert_eq!(editor.position(), Some((1, 3)));
    }

    #[test]
    fn test_edit_unknown_case() {
        let (_api, _store, notes, mut editor) = setup(FakeApi::default());
        let err = editor.edit("TC-42").unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(editor.state(), &EditorState::Idle);
        assert_eq!(notes.count(NotificationLevel::Danger), 1);
    }
}
