//! Tenant directory
//!
//! The tenant table lives in the public schema only. Lookups go through a
//! [`PublicScope`], which can only be obtained by first rebinding a
//! connection to public.

use crate::error::{Result, TenantError};
use crate::schema::{SchemaConnection, SearchPath};
use crate::tenant::Tenant;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Tenant directory queries (implement with your database).
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Find tenant by schema name
    async fn find_by_schema_name(&self, schema_name: &str) -> Result<Option<Tenant>>;

    /// Find tenant by normalized hostname
    async fn find_by_domain(&self, domain: &str) -> Result<Option<Tenant>>;

    /// Find tenant by primary key
    async fn find_by_id(&self, id: i64) -> Result<Option<Tenant>>;
}

/// Directory access granted while a connection is bound to public.
pub struct PublicScope<'a> {
    directory: &'a dyn TenantDirectory,
}

impl<'a> PublicScope<'a> {
    /// Rebind `conn` to public and open the directory.
    pub async fn enter<C: SearchPath>(
        conn: &mut SchemaConnection<C>,
        directory: &'a dyn TenantDirectory,
    ) -> Result<PublicScope<'a>> {
        conn.set_public_schema().await?;
        Ok(PublicScope { directory })
    }

    pub async fn find_by_schema_name(&self, schema_name: &str) -> Result<Option<Tenant>> {
        self.directory.find_by_schema_name(schema_name).await
    }

    pub async fn find_by_domain(&self, domain: &str) -> Result<Option<Tenant>> {
        self.directory.find_by_domain(domain).await
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<Tenant>> {
        self.directory.find_by_id(id).await
    }
}

/// In-memory tenant directory.
#[derive(Debug, Default)]
pub struct InMemoryTenantDirectory {
    tenants: RwLock<HashMap<i64, Tenant>>,
    lookups: AtomicU64,
}

impl InMemoryTenantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a directory from tenant rows.
    pub fn with_tenants(tenants: impl IntoIterator<Item = Tenant>) -> Result<Self> {
        let directory = Self::new();
        for tenant in tenants {
            directory.insert(tenant)?;
        }
        Ok(directory)
    }

    /// Add or replace a tenant, keeping schema names and domains unique.
    pub fn insert(&self, tenant: Tenant) -> Result<()> {
        tenant.validate()?;
        let mut tenants = self.tenants.write();

        let clash = tenants.values().find(|t| {
            t.id != tenant.id
                && (t.schema_name == tenant.schema_name || t.domain_url == tenant.domain_url)
        });
        if let Some(existing) = clash {
            return Err(TenantError::Storage(format!(
                "Tenant {} conflicts with tenant {} on schema or domain",
                tenant.id, existing.id
            )));
        }

        tenants.insert(tenant.id, tenant);
        Ok(())
    }

    pub fn remove(&self, id: i64) -> Option<Tenant> {
        self.tenants.write().remove(&id)
    }

    /// Flip a tenant's active flag.
    pub fn set_active(&self, id: i64, active: bool) -> Result<()> {
        self.tenants
            .write()
            .get_mut(&id)
            .map(|t| t.is_active = active)
            .ok_or_else(|| TenantError::NotFound(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.tenants.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.read().is_empty()
    }

    /// Number of queries served.
    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    fn find<P: Fn(&Tenant) -> bool>(&self, predicate: P) -> Option<Tenant> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.tenants.read().values().find(|t| predicate(t)).cloned()
    }
}

#[async_trait]
impl TenantDirectory for InMemoryTenantDirectory {
    async fn find_by_schema_name(&self, schema_name: &str) -> Result<Option<Tenant>> {
        Ok(self.find(|t| t.schema_name == schema_name))
    }

    async fn find_by_domain(&self, domain: &str) -> Result<Option<Tenant>> {
        Ok(self.find(|t| t.domain_url.eq_ignore_ascii_case(domain)))
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Tenant>> {
        Ok(self.find(|t| t.id == id))
    }
}
