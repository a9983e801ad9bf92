pub mod use_cases;

pub use use_cases::bulk_session::BulkSession;
pub use use_cases::case_editor::CaseEditor;
pub use use_cases::case_store::BulkCaseStore;
pub use use_cases::execution_coordinator::ExecutionCoordinator;
pub use use_cases::status_poller::StatusPoller;
