pub mod cli;
pub mod config;
pub mod delegation;
pub mod error;
pub mod oracle;
pub mod orchestration;
pub mod server;
pub mod stream;
pub mod transport;
