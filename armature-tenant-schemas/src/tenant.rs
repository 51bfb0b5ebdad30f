//! Tenant records and the tenant a connection is bound to.

use crate::error::{Result, TenantError};
use serde::{Deserialize, Serialize};

/// Default name of the shared schema.
pub const PUBLIC_SCHEMA: &str = "public";

/// PostgreSQL truncates identifiers longer than this.
pub const MAX_SCHEMA_NAME_LEN: usize = 63;

/// Check that `name` is usable as an unquoted schema identifier.
///
/// Accepts `[A-Za-z_][A-Za-z0-9_]*` up to [`MAX_SCHEMA_NAME_LEN`] bytes.
///
/// # Examples
///
/// ```
/// use armature_tenant_schemas::validate_schema_name;
///
/// assert!(validate_schema_name("shop1").is_ok());
/// assert!(validate_schema_name("").is_err());
/// assert!(validate_schema_name("shop1; DROP SCHEMA public").is_err());
/// ```
pub fn validate_schema_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let first_ok = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if !first_ok || !rest_ok || name.len() > MAX_SCHEMA_NAME_LEN {
        return Err(TenantError::InvalidSchemaName(name.to_string()));
    }
    Ok(())
}

/// A tenant row from the shared directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tenant {
    /// Primary key
    pub id: i64,

    /// Schema holding this tenant's tables (unique)
    pub schema_name: String,

    /// Hostname this tenant is served on (unique)
    pub domain_url: String,

    /// Deactivated tenants are never resolved
    pub is_active: bool,
}

impl Tenant {
    /// Create an active tenant
    ///
    /// # Examples
    ///
    /// ```
    /// use armature_tenant_schemas::Tenant;
    ///
    /// let tenant = Tenant::new(1, "shop1", "shop1.example.com");
    /// assert!(tenant.is_active);
    /// ```
    pub fn new(id: i64, schema_name: impl Into<String>, domain_url: impl Into<String>) -> Self {
        Self {
            id,
            schema_name: schema_name.into(),
            domain_url: domain_url.into(),
            is_active: true,
        }
    }

    /// Set active status
    pub fn with_active(mut self, active: bool) -> Self {
        self.is_active = active;
        self
    }

    /// Validate the record before it is trusted for schema switching.
    pub fn validate(&self) -> Result<()> {
        validate_schema_name(&self.schema_name)?;
        if self.domain_url.trim().is_empty() {
            return Err(TenantError::InvalidHost(format!(
                "tenant {} has no domain",
                self.id
            )));
        }
        Ok(())
    }
}

/// Stand-in for a tenant that never needs a directory row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DummyTenant {
    pub schema_name: String,
}

impl DummyTenant {
    pub fn new(schema_name: impl Into<String>) -> Self {
        Self {
            schema_name: schema_name.into(),
        }
    }
}

/// The tenant a connection or request is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundTenant {
    Tenant(Tenant),
    Dummy(DummyTenant),
}

impl BoundTenant {
    pub fn schema_name(&self) -> &str {
        match self {
            BoundTenant::Tenant(t) => &t.schema_name,
            BoundTenant::Dummy(d) => &d.schema_name,
        }
    }

    /// The directory row, if this binding came from one.
    pub fn tenant(&self) -> Option<&Tenant> {
        match self {
            BoundTenant::Tenant(t) => Some(t),
            BoundTenant::Dummy(_) => None,
        }
    }

    pub fn is_dummy(&self) -> bool {
        matches!(self, BoundTenant::Dummy(_))
    }
}

impl From<Tenant> for BoundTenant {
    fn from(tenant: Tenant) -> Self {
        BoundTenant::Tenant(tenant)
    }
}

impl From<DummyTenant> for BoundTenant {
    fn from(dummy: DummyTenant) -> Self {
        BoundTenant::Dummy(dummy)
    }
}
