//! Tenant Middleware
//!
//! Per-request schema binding: load the session, resolve the tenant, bind the
//! connection, run the handler, and hand the connection back bound to public.

use crate::context::SchemaContext;
use crate::error::TenantError;
use crate::resolver::SchemaTenantResolver;
use crate::schema::{BoxFuture, SchemaConnection, SearchPath};
use crate::session::{Session, SessionStore};
use std::sync::Arc;

/// The parts of an inbound request the middleware needs.
#[derive(Debug, Clone, Default)]
pub struct TenantRequest {
    /// Raw `Host` header
    pub host: Option<String>,
    /// Session cookie value
    pub session_id: Option<String>,
}

impl TenantRequest {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            session_id: None,
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// A handled request.
#[derive(Debug)]
pub struct Handled<T> {
    pub response: T,
    pub context: SchemaContext,
    /// Session after resolution (set the cookie from `session.id`)
    pub session: Session,
}

/// Tenant middleware
///
/// Resolution failures abort the request before the handler runs.
pub struct TenantSchemaMiddleware {
    resolver: Arc<SchemaTenantResolver>,
    sessions: Arc<dyn SessionStore>,
}

impl TenantSchemaMiddleware {
    /// Create new tenant middleware
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let resolver = Arc::new(SchemaTenantResolver::new(directory, config));
    /// let middleware = TenantSchemaMiddleware::new(resolver, session_store);
    ///
    /// let handled = middleware
    ///     .handle(&request, &mut conn, |ctx, conn| Box::pin(async move {
    ///         list_orders(conn.for_context(ctx)?).await
    ///     }))
    ///     .await?;
    /// ```
    pub fn new(resolver: Arc<SchemaTenantResolver>, sessions: Arc<dyn SessionStore>) -> Self {
        Self { resolver, sessions }
    }

    pub fn resolver(&self) -> &SchemaTenantResolver {
        &self.resolver
    }

    /// Handle one request on a checked-out connection.
    pub async fn handle<C, F, T, E>(
        &self,
        request: &TenantRequest,
        conn: &mut SchemaConnection<C>,
        handler: F,
    ) -> Result<Handled<T>, E>
    where
        C: SearchPath,
        F: for<'a> FnOnce(&'a SchemaContext, &'a mut SchemaConnection<C>) -> BoxFuture<'a, Result<T, E>>,
        E: From<TenantError>,
    {
        let mut session = match self.load_session(request).await {
            Ok(session) => session,
            Err(e) => {
                conn.restore_public().await;
                return Err(e.into());
            }
        };

        let context = self
            .resolver
            .resolve(request.host.as_deref(), &mut session, conn)
            .await?;

        if self.resolver.config().session_tenancy {
            session.touch();
            if let Err(e) = self.sessions.save(&session).await {
                conn.restore_public().await;
                return Err(e.into());
            }
        }

        let result = handler(&context, conn).await;

        match (result, conn.set_public_schema().await) {
            (Ok(response), Ok(())) => Ok(Handled {
                response,
                context,
                session,
            }),
            (Ok(_), Err(restore)) => Err(restore.into()),
            (Err(e), restored) => {
                if let Err(restore) = restored {
                    tracing::error!(error = %restore, "Failed to restore public schema after handler error");
                }
                Err(e)
            }
        }
    }

    async fn load_session(&self, request: &TenantRequest) -> Result<Session, TenantError> {
        match request.session_id.as_deref() {
            Some(id) => Ok(self
                .sessions
                .load(id)
                .await?
                .unwrap_or_else(Session::generate)),
            None => Ok(Session::generate()),
        }
    }
}
