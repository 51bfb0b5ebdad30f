//! Tenant Resolution
//!
//! Resolves the tenant of a request through an ordered chain of strategies.
//! Each strategy either produces a tenant, misses (the next strategy runs),
//! or fails hard (resolution stops):
//!
//! 1. [`SessionStrategy`]: the schema pinned in the session. A pinned schema
//!    with no active tenant is a hard failure; a pinned public schema binds
//!    a dummy tenant.
//! 2. [`HostnameStrategy`]: exact match of the normalized host on
//!    `domain_url`.
//! 3. [`DefaultSchemaStrategy`]: the configured default schema. The public
//!    schema is bound without a directory lookup; any other name must exist.
//!
//! The connection is rebound to public before the first lookup, and is left
//! bound to public whenever resolution fails.

use crate::config::{HostPolicy, TenancyConfig};
use crate::context::SchemaContext;
use crate::directory::{PublicScope, TenantDirectory};
use crate::error::{Result, TenantError};
use crate::schema::{SchemaConnection, SearchPath};
use crate::session::Session;
use crate::tenant::{BoundTenant, DummyTenant, Tenant};
use async_trait::async_trait;
use std::sync::Arc;

/// Normalize a `Host` header value for directory lookups.
///
/// Lowercases, strips the port and a trailing dot, and optionally a leading
/// `www.`.
///
/// # Examples
///
/// ```
/// use armature_tenant_schemas::normalize_hostname;
///
/// assert_eq!(normalize_hostname("www.Acme.com:8080", true).unwrap(), "acme.com");
/// assert_eq!(normalize_hostname("www.acme.com", false).unwrap(), "www.acme.com");
/// assert!(normalize_hostname("", true).is_err());
/// ```
pub fn normalize_hostname(host: &str, strip_www: bool) -> Result<String> {
    let host = host.trim();

    // [v6addr]:port keeps the brackets, anything else loses everything after ':'
    let host = if host.starts_with('[') {
        match host.find(']') {
            Some(end) => &host[..=end],
            None => return Err(TenantError::InvalidHost(host.to_string())),
        }
    } else {
        host.split(':').next().unwrap_or(host)
    };

    let mut host = host.trim_end_matches('.').to_ascii_lowercase();
    if strip_www {
        if let Some(stripped) = host.strip_prefix("www.") {
            host = stripped.to_string();
        }
    }

    let valid = !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '[' | ']' | ':'));
    if !valid {
        return Err(TenantError::InvalidHost(host));
    }
    Ok(host)
}

/// What the strategies see of the request.
#[derive(Debug, Clone, Default)]
pub struct ResolutionInput {
    /// Normalized hostname
    pub hostname: Option<String>,
    /// Schema pinned in the session
    pub session_schema: Option<String>,
    /// Directory row matching the hostname, looked up once per request
    pub host_tenant: Option<Tenant>,
}

/// One step of the fallback chain.
#[async_trait]
pub trait ResolutionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` passes to the next strategy; `Err` ends resolution.
    async fn attempt(
        &self,
        input: &ResolutionInput,
        scope: &PublicScope<'_>,
    ) -> Result<Option<BoundTenant>>;
}

/// Tenant pinned in the session by an earlier request.
///
/// A pinned public schema has no directory row and is bound as a dummy.
pub struct SessionStrategy {
    public_schema: String,
}

impl SessionStrategy {
    pub fn new(public_schema: impl Into<String>) -> Self {
        Self {
            public_schema: public_schema.into(),
        }
    }
}

#[async_trait]
impl ResolutionStrategy for SessionStrategy {
    fn name(&self) -> &'static str {
        "session"
    }

    async fn attempt(
        &self,
        input: &ResolutionInput,
        scope: &PublicScope<'_>,
    ) -> Result<Option<BoundTenant>> {
        let Some(schema) = input.session_schema.as_deref() else {
            return Ok(None);
        };

        if schema == self.public_schema {
            return Ok(Some(DummyTenant::new(schema).into()));
        }

        match scope.find_by_schema_name(schema).await? {
            Some(tenant) if tenant.is_active => Ok(Some(tenant.into())),
            _ => {
                tracing::warn!(schema, "Session references a missing or inactive tenant");
                Err(TenantError::InvalidSessionTenant(schema.to_string()))
            }
        }
    }
}

/// Tenant whose `domain_url` equals the request host.
pub struct HostnameStrategy;

#[async_trait]
impl ResolutionStrategy for HostnameStrategy {
    fn name(&self) -> &'static str {
        "hostname"
    }

    async fn attempt(
        &self,
        input: &ResolutionInput,
        _scope: &PublicScope<'_>,
    ) -> Result<Option<BoundTenant>> {
        match &input.host_tenant {
            Some(tenant) if tenant.is_active => Ok(Some(tenant.clone().into())),
            Some(tenant) => Err(TenantError::Inactive(tenant.domain_url.clone())),
            None => Ok(None),
        }
    }
}

/// Configured fallback schema.
pub struct DefaultSchemaStrategy {
    default_schema: Option<String>,
    public_schema: String,
}

impl DefaultSchemaStrategy {
    pub fn new(default_schema: Option<String>, public_schema: impl Into<String>) -> Self {
        Self {
            default_schema,
            public_schema: public_schema.into(),
        }
    }
}

#[async_trait]
impl ResolutionStrategy for DefaultSchemaStrategy {
    fn name(&self) -> &'static str {
        "default"
    }

    async fn attempt(
        &self,
        _input: &ResolutionInput,
        scope: &PublicScope<'_>,
    ) -> Result<Option<BoundTenant>> {
        let Some(default) = self.default_schema.as_deref() else {
            return Ok(None);
        };

        if default == self.public_schema {
            return Ok(Some(DummyTenant::new(default).into()));
        }

        match scope.find_by_schema_name(default).await? {
            Some(tenant) if tenant.is_active => Ok(Some(tenant.into())),
            _ => {
                tracing::warn!(schema = default, "Default tenant schema has no active tenant");
                Err(TenantError::NotFound(format!(
                    "default tenant schema '{}'",
                    default
                )))
            }
        }
    }
}

/// Ordered strategies; the first hit wins.
pub struct FallbackChain {
    strategies: Vec<Box<dyn ResolutionStrategy>>,
}

impl FallbackChain {
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    pub fn then(mut self, strategy: impl ResolutionStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    /// Session, hostname, then default schema.
    pub fn standard(config: &TenancyConfig) -> Self {
        Self::new()
            .then(SessionStrategy::new(config.public_schema_name.clone()))
            .then(HostnameStrategy)
            .then(DefaultSchemaStrategy::new(
                config.default_tenant_schema.clone(),
                config.public_schema_name.clone(),
            ))
    }

    /// Run the strategies in order; `Ok(None)` when all of them miss.
    pub async fn run(
        &self,
        input: &ResolutionInput,
        scope: &PublicScope<'_>,
    ) -> Result<Option<(BoundTenant, &'static str)>> {
        for strategy in &self.strategies {
            if let Some(tenant) = strategy.attempt(input, scope).await? {
                return Ok(Some((tenant, strategy.name())));
            }
            tracing::trace!(strategy = strategy.name(), "Resolution strategy missed");
        }
        Ok(None)
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

impl Default for FallbackChain {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves a request's tenant and binds the connection to it.
pub struct SchemaTenantResolver {
    directory: Arc<dyn TenantDirectory>,
    config: Arc<TenancyConfig>,
    chain: FallbackChain,
}

impl SchemaTenantResolver {
    /// Create a resolver with the standard fallback chain.
    pub fn new(directory: Arc<dyn TenantDirectory>, config: Arc<TenancyConfig>) -> Self {
        let chain = FallbackChain::standard(&config);
        Self {
            directory,
            config,
            chain,
        }
    }

    /// Replace the fallback chain.
    pub fn with_chain(mut self, chain: FallbackChain) -> Self {
        self.chain = chain;
        self
    }

    pub fn config(&self) -> &TenancyConfig {
        &self.config
    }

    pub fn directory(&self) -> &Arc<dyn TenantDirectory> {
        &self.directory
    }

    /// Resolve the tenant for a request and bind `conn` to it.
    ///
    /// On success the schema is pinned in `session` (session tenancy only)
    /// and the metadata cache has been cleared by the bind. On failure
    /// `conn` is left bound to public.
    pub async fn resolve<C: SearchPath>(
        &self,
        host: Option<&str>,
        session: &mut Session,
        conn: &mut SchemaConnection<C>,
    ) -> Result<SchemaContext> {
        match self.resolve_and_bind(host, session, conn).await {
            Ok(ctx) => Ok(ctx),
            Err(e) => {
                tracing::debug!(host = ?host, error = %e, "Tenant resolution failed");
                conn.restore_public().await;
                Err(e)
            }
        }
    }

    async fn resolve_and_bind<C: SearchPath>(
        &self,
        host: Option<&str>,
        session: &mut Session,
        conn: &mut SchemaConnection<C>,
    ) -> Result<SchemaContext> {
        let scope = PublicScope::enter(conn, self.directory.as_ref()).await?;

        let session_schema = if self.config.session_tenancy {
            session.pinned_schema()?
        } else {
            None
        };

        let hostname = host
            .map(|h| normalize_hostname(h, self.config.www_prefix_strip))
            .transpose()?;

        // The host tenant is needed whenever the hostname strategy can run,
        // and always when user lookups are restricted to it.
        let host_tenant = match hostname.as_deref() {
            Some(h) if session_schema.is_none() || self.config.restrict_tenant_to_host => {
                scope.find_by_domain(h).await?
            }
            _ => None,
        };

        let input = ResolutionInput {
            hostname,
            session_schema,
            host_tenant,
        };

        let (tenant, strategy) = match self.chain.run(&input, &scope).await? {
            Some(found) => found,
            None => return Err(self.not_found(input.hostname.as_deref())),
        };

        conn.set_tenant(tenant.clone()).await?;
        tracing::debug!(
            strategy,
            schema = tenant.schema_name(),
            "Tenant resolved"
        );

        if self.config.session_tenancy {
            session.set_schema_name(tenant.schema_name())?;
        }

        let is_public = self.config.is_public(tenant.schema_name());
        let urlconf = self
            .config
            .public_schema_urlconf
            .clone()
            .filter(|_| is_public);

        Ok(SchemaContext::new(tenant, self.config.public_schema_name.clone())
            .with_host_tenant(input.host_tenant)
            .with_urlconf(urlconf))
    }

    fn not_found(&self, hostname: Option<&str>) -> TenantError {
        match (hostname, self.config.host_policy) {
            (None, _) => TenantError::InvalidHost("missing host".to_string()),
            (Some(h), HostPolicy::Strict) => {
                TenantError::NotFound(format!("No tenant for hostname \"{}\"", h))
            }
            (Some(h), HostPolicy::Suspicious) => TenantError::DisallowedHost(h.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::InMemoryTenantDirectory;
    use crate::metadata::ContentTypeCache;
    use crate::schema::MemoryConnection;

    fn directory() -> Arc<InMemoryTenantDirectory> {
        Arc::new(
            InMemoryTenantDirectory::with_tenants([
                Tenant::new(1, "shop1", "shop1.example.com"),
                Tenant::new(2, "shop2", "shop2.example.com"),
                Tenant::new(3, "closed", "closed.example.com").with_active(false),
            ])
            .unwrap(),
        )
    }

    fn resolver(config: TenancyConfig) -> (SchemaTenantResolver, Arc<InMemoryTenantDirectory>) {
        let dir = directory();
        (SchemaTenantResolver::new(dir.clone(), Arc::new(config)), dir)
    }

    fn connection() -> (SchemaConnection<MemoryConnection>, MemoryConnection) {
        let raw = MemoryConnection::new();
        let conn = SchemaConnection::new(raw.clone(), "public", ContentTypeCache::shared());
        (conn, raw)
    }

    #[test]
    fn test_normalize_hostname() {
        assert_eq!(normalize_hostname("acme.com", true).unwrap(), "acme.com");
        assert_eq!(normalize_hostname("www.acme.com:8080", true).unwrap(), "acme.com");
        assert_eq!(normalize_hostname("ACME.com.", true).unwrap(), "acme.com");
        assert_eq!(normalize_hostname("[::1]:8000", true).unwrap(), "[::1]");
        assert!(matches!(
            normalize_hostname(":8080", true),
            Err(TenantError::InvalidHost(_))
        ));
        assert!(normalize_hostname("bad host.com", true).is_err());
        assert!(normalize_hostname("[::1", true).is_err());
    }

    #[tokio::test]
    async fn test_resolve_by_hostname() {
        let (resolver, _) = resolver(TenancyConfig::default().with_session_tenancy(true));
        let (mut conn, raw) = connection();
        let mut session = Session::new("s1");

        let ctx = resolver
            .resolve(Some("shop1.example.com"), &mut session, &mut conn)
            .await
            .unwrap();

        assert_eq!(ctx.schema_name(), "shop1");
        assert_eq!(ctx.host_tenant().map(|t| t.id), Some(1));
        assert_eq!(conn.current_schema(), "shop1");
        assert_eq!(session.schema_name().as_deref(), Some("shop1"));
        // public first, then the tenant
        assert_eq!(raw.history()[0], vec!["public"]);
        assert_eq!(raw.active_schema().as_deref(), Some("shop1"));
    }

    #[tokio::test]
    async fn test_equivalent_hosts_resolve_identically() {
        let (resolver, dir) = resolver(TenancyConfig::default());
        dir.insert(Tenant::new(9, "acme", "acme.com")).unwrap();

        for host in ["www.acme.com:8080", "acme.com", "ACME.COM"] {
            let (mut conn, _) = connection();
            let ctx = resolver
                .resolve(Some(host), &mut Session::new("s"), &mut conn)
                .await
                .unwrap();
            assert_eq!(ctx.schema_name(), "acme", "host {}", host);
        }
    }

    #[tokio::test]
    async fn test_session_wins_over_host() {
        let (resolver, _) = resolver(TenancyConfig::default().with_session_tenancy(true));
        let (mut conn, _) = connection();
        let mut session = Session::new("s1");
        session.set_schema_name("shop2").unwrap();

        let ctx = resolver
            .resolve(Some("shop1.example.com"), &mut session, &mut conn)
            .await
            .unwrap();

        assert_eq!(ctx.schema_name(), "shop2");
        assert_eq!(conn.current_schema(), "shop2");
        // hostname was never looked up
        assert!(ctx.host_tenant().is_none());
    }

    #[tokio::test]
    async fn test_dangling_session_is_hard_failure() {
        let config = TenancyConfig::default()
            .with_session_tenancy(true)
            .with_default_tenant_schema("public");
        let (resolver, _) = resolver(config);
        let (mut conn, _) = connection();

        for pinned in ["deleted", "closed"] {
            let mut session = Session::new("s1");
            session.set_schema_name(pinned).unwrap();

            let err = resolver
                .resolve(Some("shop1.example.com"), &mut session, &mut conn)
                .await
                .unwrap_err();

            assert!(matches!(err, TenantError::InvalidSessionTenant(_)));
            assert!(conn.is_public());
            assert!(conn.current_tenant().is_none());
        }
    }

    #[tokio::test]
    async fn test_public_pinned_session_survives_next_request() {
        let config = TenancyConfig::default()
            .with_session_tenancy(true)
            .with_default_tenant_schema("public");
        let (resolver, dir) = resolver(config);
        let (mut conn, _) = connection();
        let mut session = Session::new("s1");

        let first = resolver
            .resolve(Some("portal.example.net"), &mut session, &mut conn)
            .await
            .unwrap();
        assert!(first.tenant().is_dummy());
        assert_eq!(session.schema_name().as_deref(), Some("public"));
        let lookups = dir.lookups();

        let second = resolver
            .resolve(Some("portal.example.net"), &mut session, &mut conn)
            .await
            .unwrap();
        assert!(second.tenant().is_dummy());
        assert!(second.is_public());
        assert_eq!(conn.current_schema(), "public");
        // the session hit needs no tenant row and no host lookup
        assert_eq!(dir.lookups(), lookups);
    }

    #[tokio::test]
    async fn test_session_ignored_without_session_tenancy() {
        let (resolver, _) = resolver(TenancyConfig::default());
        let (mut conn, _) = connection();
        let mut session = Session::new("s1");
        session.set_schema_name("deleted").unwrap();

        let ctx = resolver
            .resolve(Some("shop1.example.com"), &mut session, &mut conn)
            .await
            .unwrap();
        assert_eq!(ctx.schema_name(), "shop1");
        // not rewritten either
        assert_eq!(session.schema_name().as_deref(), Some("deleted"));
    }

    #[tokio::test]
    async fn test_default_public_is_dummy_without_lookup() {
        let (resolver, dir) = resolver(
            TenancyConfig::default()
                .with_default_tenant_schema("public")
                .with_public_schema_urlconf("public_urls"),
        );
        let (mut conn, _) = connection();

        let ctx = resolver
            .resolve(Some("unknown.example.com"), &mut Session::new("s"), &mut conn)
            .await
            .unwrap();

        assert!(ctx.tenant().is_dummy());
        assert!(ctx.is_public());
        assert_eq!(ctx.urlconf(), Some("public_urls"));
        assert_eq!(conn.current_schema(), "public");
        // only the hostname lookup hit the directory
        assert_eq!(dir.lookups(), 1);
    }

    #[tokio::test]
    async fn test_default_tenant_schema() {
        let (resolver, _) = resolver(TenancyConfig::default().with_default_tenant_schema("shop2"));
        let (mut conn, _) = connection();

        let ctx = resolver
            .resolve(Some("unknown.example.com"), &mut Session::new("s"), &mut conn)
            .await
            .unwrap();
        assert_eq!(ctx.schema_name(), "shop2");
        assert!(ctx.host_tenant().is_none());
    }

    #[tokio::test]
    async fn test_misconfigured_default_is_hard_failure() {
        let (resolver, _) = resolver(TenancyConfig::default().with_default_tenant_schema("ghost"));
        let (mut conn, _) = connection();

        let err = resolver
            .resolve(Some("unknown.example.com"), &mut Session::new("s"), &mut conn)
            .await
            .unwrap_err();
        assert!(matches!(err, TenantError::NotFound(ref m) if m.contains("ghost")));
        assert!(conn.is_public());
    }

    #[tokio::test]
    async fn test_not_found_and_disallowed_host() {
        let (strict, _) = resolver(TenancyConfig::default());
        let (suspicious, _) =
            resolver(TenancyConfig::default().with_host_policy(HostPolicy::Suspicious));
        let (mut conn, _) = connection();

        let err = strict
            .resolve(Some("nope.example.com"), &mut Session::new("s"), &mut conn)
            .await
            .unwrap_err();
        assert!(matches!(err, TenantError::NotFound(_)));
        assert_eq!(err.status_code(), 404);

        let err = suspicious
            .resolve(Some("nope.example.com"), &mut Session::new("s"), &mut conn)
            .await
            .unwrap_err();
        assert!(matches!(err, TenantError::DisallowedHost(_)));

        let err = strict
            .resolve(None, &mut Session::new("s"), &mut conn)
            .await
            .unwrap_err();
        assert!(matches!(err, TenantError::InvalidHost(_)));
    }

    #[tokio::test]
    async fn test_inactive_host_tenant() {
        let (resolver, _) = resolver(TenancyConfig::default().with_default_tenant_schema("public"));
        let (mut conn, _) = connection();

        let err = resolver
            .resolve(Some("closed.example.com"), &mut Session::new("s"), &mut conn)
            .await
            .unwrap_err();
        assert!(matches!(err, TenantError::Inactive(_)));
        assert!(conn.is_public());
    }

    #[tokio::test]
    async fn test_restricted_mode_records_host_tenant_with_session() {
        let config = TenancyConfig::default()
            .with_session_tenancy(true)
            .with_restrict_tenant_to_host(true);
        let (resolver, _) = resolver(config);
        let (mut conn, _) = connection();
        let mut session = Session::new("s1");
        session.set_schema_name("shop2").unwrap();

        let ctx = resolver
            .resolve(Some("shop1.example.com"), &mut session, &mut conn)
            .await
            .unwrap();
        assert_eq!(ctx.schema_name(), "shop2");
        assert_eq!(ctx.host_tenant().map(|t| t.schema_name.as_str()), Some("shop1"));
    }

    #[tokio::test]
    async fn test_bind_failure_restores_public() {
        let (resolver, _) = resolver(TenancyConfig::default());
        let (mut conn, raw) = connection();
        raw.fail_on("shop1");

        let err = resolver
            .resolve(Some("shop1.example.com"), &mut Session::new("s"), &mut conn)
            .await
            .unwrap_err();
        assert!(matches!(err, TenantError::SchemaSwitch { .. }));
        assert!(conn.is_public());
    }

    #[tokio::test]
    async fn test_custom_chain() {
        struct Always(&'static str);

        #[async_trait]
        impl ResolutionStrategy for Always {
            fn name(&self) -> &'static str {
                "always"
            }

            async fn attempt(
                &self,
                _input: &ResolutionInput,
                _scope: &PublicScope<'_>,
            ) -> Result<Option<BoundTenant>> {
                Ok(Some(DummyTenant::new(self.0).into()))
            }
        }

        let (resolver, _) = resolver(TenancyConfig::default());
        let resolver = resolver.with_chain(FallbackChain::new().then(HostnameStrategy).then(Always("shop2")));
        let (mut conn, _) = connection();

        let ctx = resolver
            .resolve(Some("nope.example.com"), &mut Session::new("s"), &mut conn)
            .await
            .unwrap();
        assert_eq!(ctx.schema_name(), "shop2");
        assert!(ctx.tenant().is_dummy());
    }
}
