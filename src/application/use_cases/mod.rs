pub mod bulk_session;
pub mod case_editor;
pub mod case_store;
pub mod execution_coordinator;
pub mod notification_center;
pub mod status_poller;

#[cfg(test)]
pub(crate) mod test_support;
