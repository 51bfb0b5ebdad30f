//! Schema-scoped data commands.
//!
//! Dump and load operations run bound to one schema and always leave the
//! connection on public afterwards, including when they fail.
//!
//! ```rust,ignore
//! let rows = DataCommand::dump()
//!     .for_schema("shop1")
//!     .run(&mut conn, |c| Box::pin(async move { export_all(c.inner_mut()).await }))
//!     .await?;
//! ```

use crate::error::Result;
use crate::schema::{BoxFuture, SchemaConnection, SearchPath};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataCommandKind {
    Dump,
    Load,
}

impl std::fmt::Display for DataCommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dump => write!(f, "dump"),
            Self::Load => write!(f, "load"),
        }
    }
}

/// A dump or load bracketed by schema switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataCommand {
    kind: DataCommandKind,
    /// Target schema; the connection's public schema when unset
    schema: Option<String>,
}

impl DataCommand {
    pub fn dump() -> Self {
        Self {
            kind: DataCommandKind::Dump,
            schema: None,
        }
    }

    pub fn load() -> Self {
        Self {
            kind: DataCommandKind::Load,
            schema: None,
        }
    }

    pub fn for_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn kind(&self) -> DataCommandKind {
        self.kind
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// Run `op` bound to the target schema, then rebind to public.
    pub async fn run<C, F, T>(&self, conn: &mut SchemaConnection<C>, op: F) -> Result<T>
    where
        C: SearchPath,
        F: FnOnce(&mut SchemaConnection<C>) -> BoxFuture<'_, Result<T>>,
    {
        let schema = self
            .schema
            .clone()
            .unwrap_or_else(|| conn.public_schema().to_string());

        tracing::info!(command = %self.kind, schema = %schema, "Running data command");
        let result = conn.with_schema(&schema, op).await;
        if let Err(e) = &result {
            tracing::warn!(command = %self.kind, schema = %schema, error = %e, "Data command failed");
        }
        result
    }
}
