pub mod broker;
pub mod client;
pub mod input;
pub mod output;
pub mod records;

mod server;

mod error;
pub use error::GatewayError;

mod daemon;
pub use daemon::Daemon;

#[cfg(test)]
mod __tests__;
