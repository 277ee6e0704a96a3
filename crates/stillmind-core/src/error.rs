//! Core error types for stillmind-core.
//!
//! This module defines a comprehensive error hierarchy using thiserror
//! for better error handling and reporting across the library.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for stillmind-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Billing provider errors
    #[error("Billing error: {0}")]
    Billing(#[from] BillingError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{0}")]
    Custom(String),
}

/// Storage-specific errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Failed to open the store root directory
    #[error("Failed to open store at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to read a key from the store
    #[error("Failed to read key '{key}': {source}")]
    ReadFailed {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a key to the store
    #[error("Failed to write key '{key}': {source}")]
    WriteFailed {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// A stored record exists but cannot be interpreted
    #[error("Invalid record under '{key}': {message}")]
    InvalidRecord { key: String, message: String },

    /// OS keyring access failed
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    /// Record serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Billing provider errors.
#[derive(Error, Debug)]
pub enum BillingError {
    /// No API key available for the provider
    #[error("Billing API key is missing")]
    MissingApiKey,

    /// Provider is not configured (configuration failed or never ran)
    #[error("Billing provider is not configured")]
    NotConfigured,

    /// Network or transport failure talking to the provider
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Provider returned an error response
    #[error("Billing API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// No purchasable package matches the requested plan
    #[error("No package offered for plan '{0}'")]
    PlanNotOffered(String),

    /// Provider response did not match the expected shape
    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Key does not exist in the configuration schema
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
