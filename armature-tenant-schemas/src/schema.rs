//! Schema-bound connections
//!
//! Wraps a database connection and tracks which schema its search path
//! points at. Every switch either succeeds or returns an error; the caller
//! must abort instead of querying an unknown schema.
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut conn = SchemaConnection::new(pg_conn, "public", metadata_cache);
//!
//! conn.set_public_schema().await?;
//! let tenant = directory.find_by_domain("shop1.example.com").await?;
//! conn.set_tenant(tenant).await?;
//!
//! // Temporarily switch, always coming back to public
//! conn.with_schema("shop2", |c| Box::pin(async move {
//!     export(c.inner_mut()).await
//! })).await?;
//! ```

use crate::context::SchemaContext;
use crate::error::{Result, TenantError};
use crate::metadata::{MetadataCache, NoopMetadataCache};
use crate::tenant::{BoundTenant, DummyTenant, validate_schema_name};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by scoped-schema closures.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Search path control (implement with your PostgreSQL client).
#[async_trait]
pub trait SearchPath: Send {
    /// Set the search path to `schemas`, in order.
    async fn set_search_path(&mut self, schemas: &[&str]) -> Result<()>;
}

/// Render a `SET search_path` statement for already-validated schema names.
///
/// ```
/// use armature_tenant_schemas::schema::search_path_sql;
///
/// assert_eq!(
///     search_path_sql(&["shop1", "public"]),
///     r#"SET search_path = "shop1", "public""#
/// );
/// ```
pub fn search_path_sql(schemas: &[&str]) -> String {
    let quoted: Vec<String> = schemas.iter().map(|s| format!("\"{}\"", s)).collect();
    format!("SET search_path = {}", quoted.join(", "))
}

/// Binding state of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    pub current_schema: String,
    pub current_tenant: Option<BoundTenant>,
    /// A switch failed; the server-side search path is unknown.
    pub poisoned: bool,
}

/// A connection plus the schema it is bound to.
pub struct SchemaConnection<C: SearchPath> {
    conn: C,
    state: ConnectionState,
    public_schema: String,
    metadata: Arc<dyn MetadataCache>,
}

impl<C: SearchPath> SchemaConnection<C> {
    /// Wrap a connection whose search path is assumed to be the public schema.
    pub fn new(
        conn: C,
        public_schema: impl Into<String>,
        metadata: Arc<dyn MetadataCache>,
    ) -> Self {
        let public_schema = public_schema.into();
        Self {
            conn,
            state: ConnectionState {
                current_schema: public_schema.clone(),
                current_tenant: None,
                poisoned: false,
            },
            public_schema,
            metadata,
        }
    }

    /// Wrap a connection with no metadata cache attached.
    pub fn without_metadata(conn: C, public_schema: impl Into<String>) -> Self {
        Self::new(conn, public_schema, Arc::new(NoopMetadataCache))
    }

    /// Point the search path at the shared schema and clear the tenant.
    pub async fn set_public_schema(&mut self) -> Result<()> {
        let public = self.public_schema.clone();
        self.switch(&[&public], &public).await?;
        self.state.current_tenant = None;
        self.metadata.invalidate();
        Ok(())
    }

    /// Bind to a tenant's schema.
    pub async fn set_tenant(&mut self, tenant: impl Into<BoundTenant>) -> Result<()> {
        let tenant = tenant.into();
        let schema = tenant.schema_name().to_string();
        validate_schema_name(&schema)?;

        if schema == self.public_schema {
            let public = self.public_schema.clone();
            self.switch(&[&public], &public).await?;
        } else {
            let public = self.public_schema.clone();
            self.switch(&[&schema, &public], &schema).await?;
        }

        self.state.current_tenant = Some(tenant);
        self.metadata.invalidate();
        Ok(())
    }

    /// Bind to a schema by name, without a directory row.
    pub async fn set_schema(&mut self, schema_name: &str) -> Result<()> {
        self.set_tenant(DummyTenant::new(schema_name)).await
    }

    /// Run `f` bound to `schema_name`, then rebind to public on every exit path.
    ///
    /// If both `f` and the restore fail, the error from `f` is returned.
    pub async fn with_schema<F, T>(&mut self, schema_name: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> BoxFuture<'_, Result<T>>,
    {
        if let Err(e) = self.set_schema(schema_name).await {
            self.restore_public().await;
            return Err(e);
        }

        let result = f(self).await;

        match (result, self.set_public_schema().await) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(restore)) => Err(restore),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(restore)) => {
                tracing::error!(
                    schema = %schema_name,
                    error = %restore,
                    "Failed to restore public schema after failed operation"
                );
                Err(e)
            }
        }
    }

    /// Best-effort return to public; failures are logged and leave the
    /// connection poisoned.
    pub async fn restore_public(&mut self) {
        if let Err(e) = self.set_public_schema().await {
            tracing::error!(error = %e, "Failed to restore public schema");
        }
    }

    /// Borrow the raw connection for a request, checking it is bound to the
    /// request's schema.
    pub fn for_context(&mut self, ctx: &SchemaContext) -> Result<&mut C> {
        if self.state.poisoned || self.state.current_schema != ctx.schema_name() {
            return Err(TenantError::schema_switch(
                ctx.schema_name(),
                format!(
                    "connection is bound to '{}'{}",
                    self.state.current_schema,
                    if self.state.poisoned { " (poisoned)" } else { "" }
                ),
            ));
        }
        Ok(&mut self.conn)
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn current_schema(&self) -> &str {
        &self.state.current_schema
    }

    pub fn current_tenant(&self) -> Option<&BoundTenant> {
        self.state.current_tenant.as_ref()
    }

    pub fn public_schema(&self) -> &str {
        &self.public_schema
    }

    pub fn is_public(&self) -> bool {
        !self.state.poisoned && self.state.current_schema == self.public_schema
    }

    pub fn is_poisoned(&self) -> bool {
        self.state.poisoned
    }

    pub fn inner(&self) -> &C {
        &self.conn
    }

    /// Raw connection access, bypassing the binding check.
    pub fn inner_mut(&mut self) -> &mut C {
        &mut self.conn
    }

    pub fn into_inner(self) -> C {
        self.conn
    }

    async fn switch(&mut self, path: &[&str], schema: &str) -> Result<()> {
        match self.conn.set_search_path(path).await {
            Ok(()) => {
                tracing::debug!(schema = %schema, "Search path switched");
                self.state.current_schema = schema.to_string();
                self.state.poisoned = false;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(schema = %schema, error = %e, "Search path switch failed");
                self.state.current_tenant = None;
                self.state.poisoned = true;
                Err(match e {
                    TenantError::SchemaSwitch { .. } => e,
                    other => TenantError::schema_switch(schema, other),
                })
            }
        }
    }
}

/// In-memory connection that records every search path it is given.
///
/// Clones share the same history, so a test can keep one clone and hand the
/// other to a [`SchemaConnection`].
#[derive(Debug, Clone, Default)]
pub struct MemoryConnection {
    history: Arc<Mutex<Vec<Vec<String>>>>,
    fail_on: Arc<Mutex<Option<String>>>,
}

impl MemoryConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every switch whose first schema is `schema` fail.
    pub fn fail_on(&self, schema: impl Into<String>) {
        *self.fail_on.lock() = Some(schema.into());
    }

    pub fn clear_failure(&self) {
        *self.fail_on.lock() = None;
    }

    /// All search paths set so far.
    pub fn history(&self) -> Vec<Vec<String>> {
        self.history.lock().clone()
    }

    /// The first schema of the most recent search path.
    pub fn active_schema(&self) -> Option<String> {
        self.history.lock().last().and_then(|p| p.first().cloned())
    }
}

#[async_trait]
impl SearchPath for MemoryConnection {
    async fn set_search_path(&mut self, schemas: &[&str]) -> Result<()> {
        let first = schemas.first().copied().unwrap_or_default();
        if self.fail_on.lock().as_deref() == Some(first) {
            return Err(TenantError::schema_switch(first, "schema does not exist"));
        }
        self.history
            .lock()
            .push(schemas.iter().map(|s| s.to_string()).collect());
        Ok(())
    }
}
