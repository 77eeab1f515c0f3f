pub mod error;
pub mod poller;
pub mod samples;
