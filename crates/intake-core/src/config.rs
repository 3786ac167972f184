//! Configuration module
//!
//! This module provides configuration for the API: server settings, storage
//! backend selection and the upload policy enforced by the intake pipeline.

use std::env;
use std::path::Path;

use crate::constants::{DEFAULT_LOCAL_STORAGE_PATH, DEFAULT_PORT};
use crate::models::UploadPolicy;
use crate::storage_types::StorageBackend;

// Common constants
const HTTP_CONCURRENCY_LIMIT: usize = 1024;
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Base configuration for the HTTP server
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub server_port: u16,
    pub cors_origins: Vec<String>,
    pub environment: String,
    pub http_concurrency_limit: usize,
    pub request_timeout_secs: u64,
}

/// Intake service configuration
#[derive(Clone, Debug)]
pub struct IntakeConfig {
    pub base: BaseConfig,
    // Storage configuration
    pub storage_backend: StorageBackend,
    pub local_storage_path: Option<String>,
    // Loaded once at start-up, no hot reload
    pub upload_policy: UploadPolicy,
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Box<IntakeConfig>);

impl Config {
    fn as_intake(&self) -> &IntakeConfig {
        &self.0
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        is_production_name(&self.as_intake().base.environment)
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        let config = IntakeConfig::from_env()?;
        Ok(Config(Box::new(config)))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.as_intake().validate()
    }

    // Convenience getters for common fields
    pub fn server_port(&self) -> u16 {
        self.as_intake().base.server_port
    }

    pub fn cors_origins(&self) -> &[String] {
        &self.as_intake().base.cors_origins
    }

    pub fn environment(&self) -> &str {
        &self.as_intake().base.environment
    }

    pub fn http_concurrency_limit(&self) -> usize {
        self.as_intake().base.http_concurrency_limit
    }

    pub fn request_timeout_secs(&self) -> u64 {
        self.as_intake().base.request_timeout_secs
    }

    pub fn storage_backend(&self) -> StorageBackend {
        self.as_intake().storage_backend
    }

    pub fn local_storage_path(&self) -> Option<&str> {
        self.as_intake().local_storage_path.as_deref()
    }

    pub fn upload_policy(&self) -> &UploadPolicy {
        &self.as_intake().upload_policy
    }
}

fn is_production_name(environment: &str) -> bool {
    let environment = environment.to_lowercase();
    environment == "production" || environment == "prod"
}

impl IntakeConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|s| !s.trim().is_empty());

        let environment = var("ENVIRONMENT")
            .or_else(|| var("APP_ENV"))
            .unwrap_or_else(|| "development".to_string());

        let cors_origins_str = var("CORS_ORIGINS").unwrap_or_else(|| "*".to_string());
        if is_production_name(&environment) && cors_origins_str.trim() == "*" {
            return Err(anyhow::anyhow!(
                "CORS_ORIGINS cannot be '*' in production. Please specify explicit origins."
            ));
        }

        let cors_origins: Vec<String> = cors_origins_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let base = BaseConfig {
            server_port: var("PORT")
                .unwrap_or_else(|| DEFAULT_PORT.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number"))?,
            cors_origins,
            environment,
            http_concurrency_limit: var("HTTP_CONCURRENCY_LIMIT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(HTTP_CONCURRENCY_LIMIT)
                .max(1),
            request_timeout_secs: var("REQUEST_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(REQUEST_TIMEOUT_SECS)
                .max(1),
        };

        let storage_backend = match var("STORAGE_BACKEND") {
            Some(value) => value.parse()?,
            None => StorageBackend::Local,
        };

        let local_storage_path = var("LOCAL_STORAGE_PATH")
            .or_else(|| Some(DEFAULT_LOCAL_STORAGE_PATH.to_string()));

        let mut upload_policy = if let Some(path) = var("UPLOAD_POLICY_FILE") {
            let json = std::fs::read_to_string(Path::new(&path)).map_err(|e| {
                anyhow::anyhow!("Failed to read UPLOAD_POLICY_FILE {}: {}", path, e)
            })?;
            UploadPolicy::from_json(&json)?
        } else if let Some(json) = var("UPLOAD_POLICY") {
            UploadPolicy::from_json(&json)?
        } else {
            UploadPolicy::default()
        };

        if let Some(value) = var("MAX_HEADER_BYTES") {
            upload_policy.limits.max_header_bytes = parse_limit("MAX_HEADER_BYTES", &value)?;
        }
        if let Some(value) = var("MAX_FIELD_VALUE_BYTES") {
            upload_policy.limits.max_field_value_bytes =
                parse_limit("MAX_FIELD_VALUE_BYTES", &value)?;
        }
        if let Some(value) = var("MAX_PARTS") {
            upload_policy.limits.max_parts = parse_limit("MAX_PARTS", &value)?;
        }

        let config = IntakeConfig {
            base,
            storage_backend,
            local_storage_path,
            upload_policy,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.upload_policy.validate()?;

        if self.base.cors_origins.is_empty() {
            return Err(anyhow::anyhow!("CORS_ORIGINS must list at least one origin"));
        }

        match self.storage_backend {
            StorageBackend::Local => {
                if self.local_storage_path.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_PATH must be set when using local storage backend"
                    ));
                }
            }
            StorageBackend::Memory => {
                if is_production_name(&self.base.environment) {
                    return Err(anyhow::anyhow!(
                        "The memory storage backend is not durable and cannot be used in production"
                    ));
                }
            }
        }

        Ok(())
    }
}

fn parse_limit(name: &str, value: &str) -> Result<usize, anyhow::Error> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| anyhow::anyhow!("{} must be a positive integer", name))
}
