pub mod bootstrap;
pub mod config;
pub mod qa_pilot;
pub mod response;
pub mod storage;
