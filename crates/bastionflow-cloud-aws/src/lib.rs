//! bastionflow-cloud-aws - AWS provider
//!
//! Implements `ResourceProvider` on top of the EC2 and RDS SDKs.
//! Credentials come from the standard AWS chain (environment, profile,
//! instance metadata).

pub mod error;
pub mod provider;

pub use error::{AwsError, Result};
pub use provider::{AwsProvider, AwsProviderConfig};
