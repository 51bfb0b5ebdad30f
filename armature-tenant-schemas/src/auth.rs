//! Tenant-session authentication
//!
//! Authenticates users whose accounts live in the shared schema, binds the
//! connection to the user's tenant, and pins that tenant in the session.
//! With `restrict_tenant_to_host`, only users of the host's tenant match.
//!
//! Each attempt performs exactly one Argon2 operation: a verify when a
//! candidate user was found, a throwaway hash otherwise. An unknown email
//! and an email belonging to another tenant take the same time.

use crate::config::TenancyConfig;
use crate::context::SchemaContext;
use crate::error::{Result, TenantError};
use crate::schema::{SchemaConnection, SearchPath};
use crate::session::Session;
use crate::tenant::Tenant;
use argon2::{
    Argon2,
    password_hash::{
        PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString, rand_core::OsRng,
    },
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

/// A user account owned by one tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantUser {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
    pub is_active: bool,
    pub tenant: Tenant,
}

impl TenantUser {
    pub fn new(
        id: i64,
        email: impl Into<String>,
        password_hash: impl Into<String>,
        tenant: Tenant,
    ) -> Self {
        Self {
            id,
            email: email.into(),
            password_hash: password_hash.into(),
            is_active: true,
            tenant,
        }
    }
}

/// Tenant-user lookups (implement with your database).
#[async_trait]
pub trait TenantUserDirectory: Send + Sync {
    /// Find the user with `email`, optionally only within `tenant_schema`.
    ///
    /// Returns `None` when no user, or more than one user, matches.
    async fn find_by_email(
        &self,
        email: &str,
        tenant_schema: Option<&str>,
    ) -> Result<Option<TenantUser>>;
}

/// In-memory tenant-user directory.
#[derive(Debug, Default)]
pub struct InMemoryTenantUserDirectory {
    users: RwLock<Vec<TenantUser>>,
}

impl InMemoryTenantUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: TenantUser) {
        let mut users = self.users.write();
        users.retain(|u| u.id != user.id);
        users.push(user);
    }
}

#[async_trait]
impl TenantUserDirectory for InMemoryTenantUserDirectory {
    async fn find_by_email(
        &self,
        email: &str,
        tenant_schema: Option<&str>,
    ) -> Result<Option<TenantUser>> {
        let users = self.users.read();
        let mut matches = users.iter().filter(|u| {
            u.email.eq_ignore_ascii_case(email)
                && tenant_schema.is_none_or(|s| u.tenant.schema_name == s)
        });

        match (matches.next(), matches.next()) {
            (Some(user), None) => Ok(Some(user.clone())),
            _ => Ok(None),
        }
    }
}

/// Argon2 password hashing.
#[derive(Clone, Default)]
pub struct PasswordHasher {
    argon2: Argon2<'static>,
}

impl PasswordHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash a password
    pub fn hash(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| TenantError::Auth(e.to_string()))
    }

    /// Verify a password against a PHC-format hash.
    pub fn verify(&self, password: &str, hash: &str) -> Result<bool> {
        let parsed = PasswordHash::new(hash).map_err(|e| TenantError::Auth(e.to_string()))?;
        Ok(self
            .argon2
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }

    /// Spend the cost of one hash and discard the result.
    pub fn dummy_hash(&self, password: &str) {
        let _ = self.hash(password);
    }
}

/// Authentication backend for session-pinned tenancy.
pub struct TenantSessionAuthBackend {
    users: Arc<dyn TenantUserDirectory>,
    config: Arc<TenancyConfig>,
    hasher: PasswordHasher,
}

impl TenantSessionAuthBackend {
    pub fn new(users: Arc<dyn TenantUserDirectory>, config: Arc<TenancyConfig>) -> Self {
        Self {
            users,
            config,
            hasher: PasswordHasher::new(),
        }
    }

    pub fn hasher(&self) -> &PasswordHasher {
        &self.hasher
    }

    /// Check credentials.
    ///
    /// On success `conn` is bound to the user's tenant and the schema is
    /// pinned in `session`. Any mismatch returns `Ok(None)` with `conn`
    /// bound to public; infrastructure failures are returned as errors.
    pub async fn authenticate<C: SearchPath>(
        &self,
        ctx: &SchemaContext,
        session: &mut Session,
        conn: &mut SchemaConnection<C>,
        email: &str,
        password: &str,
    ) -> Result<Option<TenantUser>> {
        let mut verified = false;
        let outcome = self
            .check(ctx, session, conn, email, password, &mut verified)
            .await;

        if !verified {
            self.hasher.dummy_hash(password);
        }

        match outcome {
            Ok(Some(user)) => Ok(Some(user)),
            Ok(None) => {
                tracing::debug!("Authentication failed");
                conn.set_public_schema().await?;
                Ok(None)
            }
            Err(e) => {
                conn.restore_public().await;
                Err(e)
            }
        }
    }

    async fn check<C: SearchPath>(
        &self,
        ctx: &SchemaContext,
        session: &mut Session,
        conn: &mut SchemaConnection<C>,
        email: &str,
        password: &str,
        verified: &mut bool,
    ) -> Result<Option<TenantUser>> {
        let tenant_schema = if self.config.restrict_tenant_to_host {
            match ctx.host_tenant() {
                Some(host) => Some(host.schema_name.as_str()),
                None => {
                    tracing::debug!("No host tenant; refusing restricted user lookup");
                    return Ok(None);
                }
            }
        } else {
            None
        };

        // the user table is shared
        conn.set_public_schema().await?;
        let Some(user) = self.users.find_by_email(email, tenant_schema).await? else {
            return Ok(None);
        };

        let password_ok = match self.hasher.verify(password, &user.password_hash) {
            Ok(ok) => {
                *verified = true;
                ok
            }
            Err(e) => {
                tracing::warn!(user_id = user.id, error = %e, "Stored password hash is unreadable");
                false
            }
        };
        if !password_ok || !user.is_active || !user.tenant.is_active {
            return Ok(None);
        }

        conn.set_tenant(user.tenant.clone()).await?;
        session.set_schema_name(&user.tenant.schema_name)?;
        tracing::debug!(user_id = user.id, schema = %user.tenant.schema_name, "User authenticated");
        Ok(Some(user))
    }
}
