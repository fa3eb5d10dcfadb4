//! AWS error classification
//!
//! EC2 and RDS report failures as error codes. The orchestrator only cares
//! whether a resource was missing, already existed, or something else went
//! wrong, so the codes are folded into `ProviderError`.

use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata};
use bastionflow_cloud::ProviderError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AwsError {
    #[error("No AWS region configured. Set AWS_REGION, pass --region, or set 'region' in bastionflow.yaml")]
    MissingRegion,
}

pub type Result<T> = std::result::Result<T, AwsError>;

const NOT_FOUND_CODES: &[&str] = &[
    "DBInstanceNotFound",
    "DBInstanceNotFoundFault",
    "DBSubnetGroupNotFoundFault",
    "Gateway.NotAttached",
];

const ALREADY_EXISTS_CODES: &[&str] = &[
    "InvalidKeyPair.Duplicate",
    "InvalidPermission.Duplicate",
    "InvalidGroup.Duplicate",
    "DBSubnetGroupAlreadyExists",
    "DBSubnetGroupAlreadyExistsFault",
    "DBInstanceAlreadyExists",
    "DBInstanceAlreadyExistsFault",
];

pub fn is_not_found_code(code: &str) -> bool {
    code.ends_with(".NotFound") || NOT_FOUND_CODES.contains(&code)
}

pub fn is_already_exists_code(code: &str) -> bool {
    ALREADY_EXISTS_CODES.contains(&code)
}

/// Fold an error code into a provider error about `target`
pub fn classify(code: &str, target: &str, message: &str) -> ProviderError {
    if is_not_found_code(code) {
        ProviderError::NotFound(format!("{} ({})", target, code))
    } else if is_already_exists_code(code) {
        ProviderError::AlreadyExists(format!("{} ({})", target, code))
    } else {
        ProviderError::api(code, format!("{}: {}", target, message))
    }
}

/// Convert an SDK error from any EC2 or RDS operation
pub fn from_sdk<E>(target: &str, err: E) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error,
{
    let message = match err.message() {
        Some(message) => message.to_string(),
        None => DisplayErrorContext(&err).to_string(),
    };
    match err.code() {
        Some(code) => classify(code, target, &message),
        // Dispatch, timeout and credential failures carry no service code
        None => ProviderError::api("Unknown", format!("{}: {}", target, message)),
    }
}

/// A successful response that lacks a field we need
pub fn missing(field: &str, operation: &str) -> ProviderError {
    ProviderError::InvalidResponse(format!("{} returned no {}", operation, field))
}
