//! Tenant resolution and schema binding errors.

use thiserror::Error;

/// Result type for tenancy operations.
pub type Result<T> = std::result::Result<T, TenantError>;

/// Errors raised while resolving a tenant or switching schemas.
#[derive(Debug, Error)]
pub enum TenantError {
    /// No resolution path produced a tenant.
    #[error("Tenant not found: {0}")]
    NotFound(String),

    /// The session pinned a schema that has no matching active tenant.
    #[error("Invalid tenant stored in session: {0}")]
    InvalidSessionTenant(String),

    /// The host is not a known tenant domain (hostname-unrestricted deployments).
    #[error("Disallowed host: {0}")]
    DisallowedHost(String),

    /// The host header was missing or could not be parsed.
    #[error("Invalid host: {0}")]
    InvalidHost(String),

    /// The matched tenant exists but is deactivated.
    #[error("Tenant is inactive: {0}")]
    Inactive(String),

    /// Switching the connection's search path failed.
    #[error("Failed to switch to schema '{schema}': {reason}")]
    SchemaSwitch { schema: String, reason: String },

    #[error("Invalid schema name: {0}")]
    InvalidSchemaName(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication error: {0}")]
    Auth(String),
}

impl TenantError {
    /// HTTP status a boundary layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            TenantError::NotFound(_) | TenantError::Inactive(_) => 404,
            TenantError::InvalidSessionTenant(_)
            | TenantError::DisallowedHost(_)
            | TenantError::InvalidHost(_) => 400,
            _ => 500,
        }
    }

    /// Whether the failure was caused by the request rather than the server.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    pub(crate) fn schema_switch(schema: &str, reason: impl ToString) -> Self {
        TenantError::SchemaSwitch {
            schema: schema.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(TenantError::NotFound("x".into()).status_code(), 404);
        assert_eq!(TenantError::Inactive("x".into()).status_code(), 404);
        assert_eq!(
            TenantError::InvalidSessionTenant("x".into()).status_code(),
            400
        );
        assert_eq!(TenantError::DisallowedHost("x".into()).status_code(), 400);
        assert_eq!(TenantError::InvalidHost("".into()).status_code(), 400);
        assert_eq!(
            TenantError::schema_switch("acme", "connection reset").status_code(),
            500
        );
    }

    #[test]
    fn test_distinct_failure_kinds() {
        let not_found = TenantError::NotFound("shop1.example.com".into());
        let dangling = TenantError::InvalidSessionTenant("shop1".into());

        assert!(matches!(not_found, TenantError::NotFound(_)));
        assert!(matches!(dangling, TenantError::InvalidSessionTenant(_)));
        assert!(not_found.is_client_error());
        assert!(dangling.is_client_error());
        assert!(!TenantError::Storage("down".into()).is_client_error());
    }

    #[test]
    fn test_error_display() {
        let err = TenantError::schema_switch("acme", "permission denied");
        assert_eq!(
            err.to_string(),
            "Failed to switch to schema 'acme': permission denied"
        );
    }
}
