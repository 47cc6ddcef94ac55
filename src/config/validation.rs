use std::net::SocketAddr;

use crate::config::models::GatewayConfig;

pub type ValidationResult<T> = Result<T, ValidationError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Bootstrap configuration validator. Collects every problem before
/// failing so a broken config surfaces all at once.
pub struct GatewayConfigValidator;

impl GatewayConfigValidator {
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        for (field, address) in [
            ("listen_addr", &config.listen_addr),
            ("admin_addr", &config.admin_addr),
        ] {
            if let Err(e) = address.parse::<SocketAddr>() {
                errors.push(ValidationError::InvalidListenAddress {
                    address: format!("{field}={address}"),
                    reason: e.to_string(),
                });
            }
        }

        if config.listen_addr == config.admin_addr {
            errors.push(ValidationError::InvalidField {
                field: "admin_addr".to_string(),
                message: "data and admin planes cannot share a listener".to_string(),
            });
        }

        if config.store.endpoints.is_empty() {
            errors.push(ValidationError::InvalidField {
                field: "store.endpoints".to_string(),
                message: "at least one endpoint is required".to_string(),
            });
        }

        if let Some(rl) = &config.rate_limit {
            if rl.per_second == 0 {
                errors.push(ValidationError::InvalidField {
                    field: "rate_limit.per_second".to_string(),
                    message: "must be greater than 0".to_string(),
                });
            }
        }

        if let Some(secret) = &config.jwt_secret {
            if secret.is_empty() {
                errors.push(ValidationError::InvalidField {
                    field: "jwt_secret".to_string(),
                    message: "cannot be empty when set".to_string(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            })
        }
    }
}
