// Provider-side runtime (daemon functionality)
pub mod account;
pub mod accounts;
pub mod bus;
pub mod config;
pub mod dispatch;
pub mod idle;
pub mod jobs;
pub mod peers;
pub mod process;
pub mod server;

// Fakes for exercising the runtime without a bus
pub mod testkit;

// Re-exports for provider binaries
pub use config::Config as ServiceConfig;
pub use server::{Server, ServerError};
