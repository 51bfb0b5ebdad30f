//! Request-scoped schema context.

use crate::tenant::{BoundTenant, Tenant};

/// Outcome of tenant resolution for one request.
///
/// Produced by the resolver and passed explicitly to every data-access call
/// made while handling the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaContext {
    tenant: BoundTenant,
    host_tenant: Option<Tenant>,
    public_schema: String,
    urlconf: Option<String>,
}

impl SchemaContext {
    pub fn new(tenant: impl Into<BoundTenant>, public_schema: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            host_tenant: None,
            public_schema: public_schema.into(),
            urlconf: None,
        }
    }

    pub fn with_host_tenant(mut self, host_tenant: Option<Tenant>) -> Self {
        self.host_tenant = host_tenant;
        self
    }

    pub fn with_urlconf(mut self, urlconf: Option<String>) -> Self {
        self.urlconf = urlconf;
        self
    }

    /// The tenant this request runs as.
    pub fn tenant(&self) -> &BoundTenant {
        &self.tenant
    }

    /// The tenant implied by the hostname alone, if any.
    pub fn host_tenant(&self) -> Option<&Tenant> {
        self.host_tenant.as_ref()
    }

    pub fn schema_name(&self) -> &str {
        self.tenant.schema_name()
    }

    pub fn is_public(&self) -> bool {
        self.schema_name() == self.public_schema
    }

    /// Alternate routing table selected for this request.
    pub fn urlconf(&self) -> Option<&str> {
        self.urlconf.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::DummyTenant;

    #[test]
    fn test_context_accessors() {
        let host = Tenant::new(1, "shop1", "shop1.example.com");
        let ctx = SchemaContext::new(host.clone(), "public").with_host_tenant(Some(host));

        assert_eq!(ctx.schema_name(), "shop1");
        assert!(!ctx.is_public());
        assert_eq!(ctx.host_tenant().map(|t| t.id), Some(1));
        assert_eq!(ctx.urlconf(), None);
    }

    #[test]
    fn test_public_context() {
        let ctx = SchemaContext::new(DummyTenant::new("public"), "public")
            .with_urlconf(Some("public_urls".to_string()));
        assert!(ctx.is_public());
        assert_eq!(ctx.urlconf(), Some("public_urls"));
    }
}
