//! Schema-per-Tenant Isolation for Armature
//!
//! One database, one PostgreSQL schema per tenant, plus a shared `public`
//! schema holding the tenant directory and cross-tenant apps.
//!
//! # Features
//!
//! - 🔍 **Tenant Resolution** - Session, hostname and default-schema fallback chain
//! - 🗄️ **Schema-Bound Connections** - Explicit search path binding with restore-to-public
//! - 🧭 **Migration Routing** - Shared vs tenant apps, per-model schema pins
//! - 🧹 **Metadata Invalidation** - Model metadata caches cleared on every switch
//! - 🔐 **Tenant-Session Auth** - Host-restricted user lookups with constant-cost failures
//! - 💾 **Schema-Aware Caching** - `{schema}:{prefix}:{version}:{key}` namespacing
//!
//! # Quick Start
//!
//! ## 1. Implement the search path and directory seams
//!
//! ```rust,ignore
//! use armature_tenant_schemas::*;
//!
//! struct PgConn(tokio_postgres::Client);
//!
//! #[async_trait]
//! impl SearchPath for PgConn {
//!     async fn set_search_path(&mut self, schemas: &[&str]) -> Result<()> {
//!         self.0
//!             .batch_execute(&schema::search_path_sql(schemas))
//!             .await
//!             .map_err(|e| TenantError::Storage(e.to_string()))
//!     }
//! }
//! ```
//!
//! ## 2. Resolve and bind per request
//!
//! ```rust,ignore
//! let config = Arc::new(TenancyConfig::from_file("tenancy.toml")?);
//! let resolver = Arc::new(SchemaTenantResolver::new(directory, config));
//! let middleware = TenantSchemaMiddleware::new(resolver, session_store);
//!
//! let mut conn = SchemaConnection::new(pool.get().await?, "public", metadata_cache);
//! let handled = middleware
//!     .handle(&request, &mut conn, |ctx, conn| Box::pin(async move {
//!         load_orders(conn.for_context(ctx)?).await
//!     }))
//!     .await?;
//! ```
//!
//! ## 3. Route migrations
//!
//! ```rust,ignore
//! let router = TenantSyncRouter::from_config(&config, Arc::new(registry));
//! if router.is_migration_allowed(conn.current_schema(), "orders", Some("invoice")) {
//!     apply(&migration).await?;
//! }
//! ```

pub mod auth;
pub mod cache;
pub mod commands;
pub mod config;
pub mod context;
pub mod directory;
pub mod error;
pub mod metadata;
pub mod middleware;
pub mod resolver;
pub mod router;
pub mod schema;
pub mod session;
pub mod tenant;

pub use async_trait::async_trait;

pub use auth::{
    InMemoryTenantUserDirectory, PasswordHasher, TenantSessionAuthBackend, TenantUser,
    TenantUserDirectory,
};
pub use cache::{CacheError, CacheProvider, SchemaCache, make_key, make_tenant_session_key, reverse_key};
pub use commands::{DataCommand, DataCommandKind};
pub use config::{HostPolicy, TenancyConfig};
pub use context::SchemaContext;
pub use directory::{InMemoryTenantDirectory, PublicScope, TenantDirectory};
pub use error::{Result, TenantError};
pub use metadata::{ContentTypeCache, MetadataCache, NoopMetadataCache};
pub use middleware::{Handled, TenantRequest, TenantSchemaMiddleware};
pub use resolver::{
    DefaultSchemaStrategy, FallbackChain, HostnameStrategy, ResolutionInput, ResolutionStrategy,
    SchemaTenantResolver, SessionStrategy, normalize_hostname,
};
pub use router::{
    MigrationDecision, MigrationRouter, ModelMeta, ModelRegistry, RouterChain, TenantSyncRouter,
};
pub use schema::{BoxFuture, ConnectionState, MemoryConnection, SchemaConnection, SearchPath};
pub use session::{InMemorySessionStore, SCHEMA_SESSION_KEY, Session, SessionStore};
pub use tenant::{BoundTenant, DummyTenant, PUBLIC_SCHEMA, Tenant, validate_schema_name};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::TenancyConfig;
    pub use crate::context::SchemaContext;
    pub use crate::directory::TenantDirectory;
    pub use crate::error::{Result, TenantError};
    pub use crate::middleware::{TenantRequest, TenantSchemaMiddleware};
    pub use crate::resolver::SchemaTenantResolver;
    pub use crate::router::{MigrationDecision, MigrationRouter, TenantSyncRouter};
    pub use crate::schema::{SchemaConnection, SearchPath};
    pub use crate::session::{Session, SessionStore};
    pub use crate::tenant::{BoundTenant, Tenant};
}
