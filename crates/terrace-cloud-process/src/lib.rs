//! External command provider for Terrace
//!
//! This crate implements the `ProviderAdapter` trait by spawning a command
//! for every operation and exchanging one JSON message over stdin/stdout.
//! Any language can implement a provider this way.
//!
//! # Example
//!
//! ```ignore
//! use terrace_cloud::ProviderAdapter;
//! use terrace_cloud_process::{ProcessConfig, ProcessProvider};
//!
//! let config = ProcessConfig::new("terrace-azure").with_env("AZURE_TENANT", "contoso");
//! let provider = ProcessProvider::new("azure", config);
//!
//! let outputs = provider
//!     .realize("azure:resources:ResourceGroup", "rg", &inputs)
//!     .await?;
//! ```

pub mod error;
pub mod protocol;
pub mod provider;

pub use error::{ProcessError, Result};
pub use protocol::{Operation, Request, Response};
pub use provider::{ProcessConfig, ProcessProvider};
