//! Schema-aware caching
//!
//! Cache keys are namespaced as `{schema}:{key_prefix}:{version}:{key}`.
//! Session-store keys use the fixed `__tenant_session__` namespace instead,
//! because the schema itself is looked up through the session.

use crate::context::SchemaContext;
use async_trait::async_trait;
use std::time::Duration;

/// Namespace used for session-store keys.
pub const TENANT_SESSION_PREFIX: &str = "__tenant_session__";

/// Build a schema-namespaced cache key.
///
/// ```
/// use armature_tenant_schemas::cache::make_key;
///
/// assert_eq!(make_key("shop1", "app", 1, "users:1"), "shop1:app:1:users:1");
/// ```
pub fn make_key(schema_name: &str, key_prefix: &str, version: u32, key: &str) -> String {
    format!("{}:{}:{}:{}", schema_name, key_prefix, version, key)
}

/// Like [`make_key`], but keys written by the session store share one
/// namespace across all schemas.
pub fn make_tenant_session_key(
    schema_name: &str,
    key_prefix: &str,
    version: u32,
    key: &str,
    session_key_prefix: &str,
) -> String {
    let namespace = if key.starts_with(session_key_prefix) {
        TENANT_SESSION_PREFIX
    } else {
        schema_name
    };
    make_key(namespace, key_prefix, version, key)
}

/// Recover the original key from a namespaced one.
///
/// Splits on `:` at most three times and returns the fourth component, so
/// colons inside the original key survive.
///
/// ```
/// use armature_tenant_schemas::cache::reverse_key;
///
/// assert_eq!(reverse_key("shop1:app:1:users:1"), Some("users:1"));
/// assert_eq!(reverse_key("not-namespaced"), None);
/// ```
pub fn reverse_key(key: &str) -> Option<&str> {
    key.splitn(4, ':').nth(3)
}

/// Cache provider trait
///
/// Users implement this with their cache backend (Redis, Memcached, etc.).
#[async_trait]
pub trait CacheProvider: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>)
    -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    async fn exists(&self, key: &str) -> Result<bool, CacheError>;
}

/// Cache errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache error: {0}")]
    Error(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

/// Cache wrapper namespacing keys by the request's bound schema.
pub struct SchemaCache<P: CacheProvider> {
    provider: P,
    key_prefix: String,
    version: u32,
    session_key_prefix: Option<String>,
}

impl<P: CacheProvider> SchemaCache<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            key_prefix: String::new(),
            version: 1,
            session_key_prefix: None,
        }
    }

    pub fn with_key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = key_prefix.into();
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Keep keys starting with `prefix` in the shared session namespace.
    pub fn with_session_keys(mut self, prefix: impl Into<String>) -> Self {
        self.session_key_prefix = Some(prefix.into());
        self
    }

    /// The namespaced key for `key` under `ctx`.
    pub fn key(&self, ctx: &SchemaContext, key: &str) -> String {
        match &self.session_key_prefix {
            Some(session_prefix) => make_tenant_session_key(
                ctx.schema_name(),
                &self.key_prefix,
                self.version,
                key,
                session_prefix,
            ),
            None => make_key(ctx.schema_name(), &self.key_prefix, self.version, key),
        }
    }

    pub async fn get(&self, ctx: &SchemaContext, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.provider.get(&self.key(ctx, key)).await
    }

    pub async fn set(
        &self,
        ctx: &SchemaContext,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.provider.set(&self.key(ctx, key), value, ttl).await
    }

    pub async fn delete(&self, ctx: &SchemaContext, key: &str) -> Result<(), CacheError> {
        self.provider.delete(&self.key(ctx, key)).await
    }

    pub async fn exists(&self, ctx: &SchemaContext, key: &str) -> Result<bool, CacheError> {
        self.provider.exists(&self.key(ctx, key)).await
    }

    /// Get value with JSON deserialization
    pub async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        ctx: &SchemaContext,
        key: &str,
    ) -> Result<Option<T>, CacheError> {
        match self.get(ctx, key).await? {
            Some(data) => {
                let value = serde_json::from_slice(&data)
                    .map_err(|e| CacheError::Serialization(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Set value with JSON serialization
    pub async fn set_json<T: serde::Serialize>(
        &self,
        ctx: &SchemaContext,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let data =
            serde_json::to_vec(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.set(ctx, key, data, ttl).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::{DummyTenant, Tenant};
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    struct MockCacheProvider {
        data: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl MockCacheProvider {
        fn new() -> Self {
            Self {
                data: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl CacheProvider for MockCacheProvider {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
            Ok(self.data.lock().await.get(key).cloned())
        }

        async fn set(
            &self,
            key: &str,
            value: Vec<u8>,
            _ttl: Option<Duration>,
        ) -> Result<(), CacheError> {
            self.data.lock().await.insert(key.to_string(), value);
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<(), CacheError> {
            self.data.lock().await.remove(key);
            Ok(())
        }

        async fn exists(&self, key: &str) -> Result<bool, CacheError> {
            Ok(self.data.lock().await.contains_key(key))
        }
    }

    fn ctx(schema: &str) -> SchemaContext {
        SchemaContext::new(Tenant::new(1, schema, format!("{}.example.com", schema)), "public")
    }

    #[test]
    fn test_session_keys_share_namespace() {
        let session_key = make_tenant_session_key("shop1", "", 1, "armature.session.abc", "armature.session");
        assert_eq!(session_key, "__tenant_session__::1:armature.session.abc");

        let other = make_tenant_session_key("shop1", "", 1, "users:1", "armature.session");
        assert_eq!(other, "shop1::1:users:1");
    }

    #[test]
    fn test_reverse_key() {
        let key = make_key("shop1", "app", 3, "a:b:c");
        assert_eq!(reverse_key(&key), Some("a:b:c"));
        assert_eq!(reverse_key("a:b:c"), None);
        assert_eq!(reverse_key("a:b:c:"), Some(""));
    }

    #[tokio::test]
    async fn test_schema_isolation() {
        let cache = SchemaCache::new(MockCacheProvider::new()).with_key_prefix("app");

        cache.set(&ctx("shop1"), "key", b"one".to_vec(), None).await.unwrap();
        cache.set(&ctx("shop2"), "key", b"two".to_vec(), None).await.unwrap();

        assert_eq!(cache.get(&ctx("shop1"), "key").await.unwrap(), Some(b"one".to_vec()));
        assert_eq!(cache.get(&ctx("shop2"), "key").await.unwrap(), Some(b"two".to_vec()));

        let public = SchemaContext::new(DummyTenant::new("public"), "public");
        assert!(!cache.exists(&public, "key").await.unwrap());
    }

    #[tokio::test]
    async fn test_session_entries_not_partitioned() {
        let cache = SchemaCache::new(MockCacheProvider::new()).with_session_keys("armature.session");

        cache
            .set(&ctx("shop1"), "armature.session.xyz", b"s".to_vec(), None)
            .await
            .unwrap();
        assert!(cache.exists(&ctx("shop2"), "armature.session.xyz").await.unwrap());

        cache.delete(&ctx("shop2"), "armature.session.xyz").await.unwrap();
        assert!(!cache.exists(&ctx("shop1"), "armature.session.xyz").await.unwrap());
    }

    #[tokio::test]
    async fn test_cache_json() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct User {
            id: u32,
            name: String,
        }

        let cache = SchemaCache::new(MockCacheProvider::new()).with_version(2);
        let user = User {
            id: 1,
            name: "Alice".to_string(),
        };

        cache.set_json(&ctx("shop1"), "user:1", &user, None).await.unwrap();
        assert_eq!(cache.key(&ctx("shop1"), "user:1"), "shop1::2:user:1");

        let retrieved: Option<User> = cache.get_json(&ctx("shop1"), "user:1").await.unwrap();
        assert_eq!(retrieved, Some(user));
    }
}
