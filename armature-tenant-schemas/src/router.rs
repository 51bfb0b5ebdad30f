//! Migration routing
//!
//! Decides whether a schema-altering operation for an app (and optionally a
//! single model) may run against the schema currently being synced. Shared
//! apps migrate only in the public schema, tenant apps only in tenant
//! schemas, and a model pinned to one schema migrates nowhere else.
//!
//! # Example
//!
//! ```
//! use armature_tenant_schemas::{
//!     MigrationDecision, ModelMeta, ModelRegistry, TenancyConfig, TenantSyncRouter,
//! };
//! use std::sync::Arc;
//!
//! let config = TenancyConfig::default()
//!     .with_shared_apps(["customers"])
//!     .with_tenant_apps(["orders"]);
//! let registry = ModelRegistry::new()
//!     .with_model(ModelMeta::new("orders", "Invoice").pinned_to("shop1"));
//! let router = TenantSyncRouter::from_config(&config, Arc::new(registry));
//!
//! assert!(router.is_migration_allowed("public", "customers", None));
//! assert!(!router.is_migration_allowed("shop1", "customers", None));
//! assert!(router.is_migration_allowed("shop1", "orders", Some("invoice")));
//! assert!(!router.is_migration_allowed("shop2", "orders", Some("invoice")));
//! assert_eq!(
//!     router.decide("shop1", "orders", None),
//!     MigrationDecision::Abstain
//! );
//! ```

use crate::config::{TenancyConfig, app_label};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Three-valued router answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationDecision {
    Allow,
    Deny,
    /// No opinion; the next router (or the runner's default) decides.
    Abstain,
}

impl MigrationDecision {
    /// Final answer for a migration runner. `Abstain` allows.
    pub fn is_allowed(self) -> bool {
        !matches!(self, MigrationDecision::Deny)
    }

    /// `self` unless it abstains, in which case `next`.
    pub fn or_else<F: FnOnce() -> MigrationDecision>(self, next: F) -> MigrationDecision {
        match self {
            MigrationDecision::Abstain => next(),
            decided => decided,
        }
    }
}

/// Static registration record of a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelMeta {
    pub app_label: String,
    pub model_name: String,
    /// Restrict this model's table to exactly one schema.
    pub schema_pin: Option<String>,
}

impl ModelMeta {
    pub fn new(app_label: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            app_label: app_label.into(),
            model_name: model_name.into(),
            schema_pin: None,
        }
    }

    pub fn pinned_to(mut self, schema_name: impl Into<String>) -> Self {
        self.schema_pin = Some(schema_name.into()).filter(|s: &String| !s.trim().is_empty());
        self
    }
}

/// Registered models, grouped by app label.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: HashMap<String, Vec<ModelMeta>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, model: ModelMeta) {
        let models = self.models.entry(model.app_label.clone()).or_default();
        models.retain(|m| !m.model_name.eq_ignore_ascii_case(&model.model_name));
        models.push(model);
    }

    pub fn with_model(mut self, model: ModelMeta) -> Self {
        self.register(model);
        self
    }

    /// Look up a model; model names compare case-insensitively.
    pub fn get(&self, app_label: &str, model_name: &str) -> Option<&ModelMeta> {
        self.models
            .get(app_label)?
            .iter()
            .find(|m| m.model_name.eq_ignore_ascii_case(model_name))
    }

    pub fn len(&self) -> usize {
        self.models.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A migration router.
pub trait MigrationRouter: Send + Sync {
    fn allow_migrate(
        &self,
        current_schema: &str,
        app_label: &str,
        model_name: Option<&str>,
    ) -> MigrationDecision;
}

/// Keeps shared-app tables out of tenant schemas and vice versa.
#[derive(Debug, Clone)]
pub struct TenantSyncRouter {
    public_schema: String,
    shared_apps: HashSet<String>,
    tenant_apps: HashSet<String>,
    registry: Arc<ModelRegistry>,
}

impl TenantSyncRouter {
    pub fn new<S, T>(
        public_schema: impl Into<String>,
        shared_apps: S,
        tenant_apps: T,
        registry: Arc<ModelRegistry>,
    ) -> Self
    where
        S: IntoIterator,
        S::Item: AsRef<str>,
        T: IntoIterator,
        T::Item: AsRef<str>,
    {
        Self {
            public_schema: public_schema.into(),
            shared_apps: labels(shared_apps),
            tenant_apps: labels(tenant_apps),
            registry,
        }
    }

    pub fn from_config(config: &TenancyConfig, registry: Arc<ModelRegistry>) -> Self {
        Self::new(
            config.public_schema_name.clone(),
            &config.shared_apps,
            &config.tenant_apps,
            registry,
        )
    }

    /// Decide for one `(schema, app, model)` combination.
    pub fn decide(
        &self,
        current_schema: &str,
        app_label: &str,
        model_name: Option<&str>,
    ) -> MigrationDecision {
        let schema = current_schema.trim();
        let is_public = schema == self.public_schema;

        let apps = if is_public {
            &self.shared_apps
        } else {
            &self.tenant_apps
        };
        if !apps.contains(app_label) {
            tracing::trace!(schema, app_label, "App not installed for schema");
            return MigrationDecision::Deny;
        }

        let pin = model_name
            .and_then(|name| self.registry.get(app_label, name))
            .and_then(|model| model.schema_pin.as_deref());

        match pin {
            Some(pin) if pin.trim() != schema => {
                tracing::trace!(schema, app_label, pin, "Model pinned to another schema");
                MigrationDecision::Deny
            }
            _ => MigrationDecision::Abstain,
        }
    }

    /// Boolean form used by migration runners.
    pub fn is_migration_allowed(
        &self,
        current_schema: &str,
        app_label: &str,
        model_name: Option<&str>,
    ) -> bool {
        self.decide(current_schema, app_label, model_name)
            .is_allowed()
    }
}

impl MigrationRouter for TenantSyncRouter {
    fn allow_migrate(
        &self,
        current_schema: &str,
        app_label: &str,
        model_name: Option<&str>,
    ) -> MigrationDecision {
        self.decide(current_schema, app_label, model_name)
    }
}

fn labels<I>(apps: I) -> HashSet<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    apps.into_iter()
        .map(|a| app_label(a.as_ref()).to_string())
        .collect()
}

/// Ordered routers; the first one with an opinion wins.
#[derive(Default, Clone)]
pub struct RouterChain {
    routers: Vec<Arc<dyn MigrationRouter>>,
}

impl RouterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_router(mut self, router: Arc<dyn MigrationRouter>) -> Self {
        self.routers.push(router);
        self
    }

    pub fn is_migration_allowed(
        &self,
        current_schema: &str,
        app_label: &str,
        model_name: Option<&str>,
    ) -> bool {
        self.allow_migrate(current_schema, app_label, model_name)
            .is_allowed()
    }
}

impl MigrationRouter for RouterChain {
    fn allow_migrate(
        &self,
        current_schema: &str,
        app_label: &str,
        model_name: Option<&str>,
    ) -> MigrationDecision {
        self.routers
            .iter()
            .map(|r| r.allow_migrate(current_schema, app_label, model_name))
            .find(|d| *d != MigrationDecision::Abstain)
            .unwrap_or(MigrationDecision::Abstain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> TenantSyncRouter {
        let registry = ModelRegistry::new()
            .with_model(ModelMeta::new("shared", "Stats").pinned_to("public"))
            .with_model(ModelMeta::new("orders", "Invoice").pinned_to("tenantA"))
            .with_model(ModelMeta::new("orders", "Order"));
        TenantSyncRouter::new(
            "public",
            ["django.contrib.contenttypes", "customers", "shared"],
            ["django.contrib.contenttypes", "orders", "shared"],
            Arc::new(registry),
        )
    }

    #[test]
    fn test_shared_app() {
        let r = router();
        assert!(r.is_migration_allowed("public", "customers", None));
        assert!(!r.is_migration_allowed("tenantA", "customers", None));
        assert!(!r.is_migration_allowed("tenantB", "customers", None));
    }

    #[test]
    fn test_tenant_app() {
        let r = router();
        assert!(!r.is_migration_allowed("public", "orders", None));
        assert!(r.is_migration_allowed("tenantA", "orders", None));
        assert!(r.is_migration_allowed("tenantB", "orders", Some("order")));
    }

    #[test]
    fn test_app_in_both_lists() {
        let r = router();
        assert!(r.is_migration_allowed("public", "contenttypes", None));
        assert!(r.is_migration_allowed("tenantA", "contenttypes", None));
    }

    #[test]
    fn test_model_pinned_to_tenant() {
        let r = router();
        assert_eq!(r.decide("tenantA", "orders", Some("Invoice")), MigrationDecision::Abstain);
        assert!(r.is_migration_allowed("tenantA", "orders", Some("invoice")));
        assert!(!r.is_migration_allowed("tenantB", "orders", Some("invoice")));
        // `orders` is not a shared app, so public is refused either way
        assert!(!r.is_migration_allowed("public", "orders", Some("invoice")));
    }

    #[test]
    fn test_model_pinned_to_public() {
        let r = router();
        assert!(r.is_migration_allowed("public", "shared", Some("stats")));
        assert!(!r.is_migration_allowed("tenantA", "shared", Some("stats")));
        // unpinned models of the same app are unaffected
        assert!(r.is_migration_allowed("tenantA", "shared", Some("other")));
    }

    #[test]
    fn test_schema_is_trimmed() {
        let r = router();
        assert!(r.is_migration_allowed(" public ", "customers", None));
    }

    #[test]
    fn test_decision_or_else() {
        use MigrationDecision::*;
        assert_eq!(Abstain.or_else(|| Deny), Deny);
        assert_eq!(Allow.or_else(|| Deny), Allow);
        assert!(Abstain.is_allowed());
        assert!(!Deny.is_allowed());
    }

    struct Fixed(MigrationDecision);

    impl MigrationRouter for Fixed {
        fn allow_migrate(&self, _: &str, _: &str, _: Option<&str>) -> MigrationDecision {
            self.0
        }
    }

    #[test]
    fn test_router_chain() {
        let chain = RouterChain::new()
            .with_router(Arc::new(router()))
            .with_router(Arc::new(Fixed(MigrationDecision::Deny)));

        // sync router denies: chain stops there
        assert!(!chain.is_migration_allowed("public", "orders", None));
        // sync router abstains: the fixed router decides
        assert!(!chain.is_migration_allowed("public", "customers", None));

        let permissive = RouterChain::new()
            .with_router(Arc::new(Fixed(MigrationDecision::Abstain)))
            .with_router(Arc::new(Fixed(MigrationDecision::Allow)));
        assert_eq!(
            permissive.allow_migrate("public", "x", None),
            MigrationDecision::Allow
        );
        assert_eq!(
            RouterChain::new().allow_migrate("public", "x", None),
            MigrationDecision::Abstain
        );
    }

    #[test]
    fn test_registry_replaces_by_name() {
        let mut registry = ModelRegistry::new();
        registry.register(ModelMeta::new("orders", "Invoice"));
        registry.register(ModelMeta::new("orders", "invoice").pinned_to("tenantA"));
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get("orders", "INVOICE").and_then(|m| m.schema_pin.as_deref()),
            Some("tenantA")
        );
    }
}
