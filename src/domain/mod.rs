pub mod error;
pub mod execution;
pub mod notification;
pub mod suite;
pub mod test_case;
