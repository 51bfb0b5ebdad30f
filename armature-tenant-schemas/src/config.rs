//! Tenancy configuration.
//!
//! Loaded from TOML, from `TENANCY_*` environment variables (a `.env` file is
//! honoured), or built in code.
//!
//! ```toml
//! public_schema_name = "public"
//! default_tenant_schema = "public"
//! restrict_tenant_to_host = false
//! shared_apps = ["customers", "django.contrib.contenttypes"]
//! tenant_apps = ["orders", "django.contrib.contenttypes"]
//! public_schema_urlconf = "public_urls"
//! www_prefix_strip = true
//! session_tenancy = false
//! host_policy = "strict"
//! ```

use crate::error::{Result, TenantError};
use crate::tenant::{PUBLIC_SCHEMA, validate_schema_name};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "TENANCY_";

/// How an unknown host is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostPolicy {
    /// Every valid host is a tenant subdomain; unknown hosts are "not found".
    #[default]
    Strict,
    /// Tenants bring arbitrary domains; an unknown host is a disallowed host.
    Suspicious,
}

impl FromStr for HostPolicy {
    type Err = TenantError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Ok(HostPolicy::Strict),
            "suspicious" => Ok(HostPolicy::Suspicious),
            other => Err(TenantError::Config(format!("Unknown host policy: {}", other))),
        }
    }
}

/// Tenancy configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenancyConfig {
    /// Schema holding the tenant directory and shared apps
    pub public_schema_name: String,

    /// Fallback schema when neither session nor host resolve a tenant
    pub default_tenant_schema: Option<String>,

    /// Restrict tenant-user lookups to the tenant implied by the host
    pub restrict_tenant_to_host: bool,

    /// Apps whose tables live only in the public schema
    pub shared_apps: Vec<String>,

    /// Apps whose tables live in every tenant schema
    pub tenant_apps: Vec<String>,

    /// Routing table activated when the public schema is bound
    pub public_schema_urlconf: Option<String>,

    /// Strip a leading `www.` from request hosts
    pub www_prefix_strip: bool,

    /// Pin the tenant in the session after the first resolution
    pub session_tenancy: bool,

    pub host_policy: HostPolicy,

    /// Cache keys starting with this prefix belong to the session store
    pub session_key_prefix: String,
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            public_schema_name: PUBLIC_SCHEMA.to_string(),
            default_tenant_schema: None,
            restrict_tenant_to_host: false,
            shared_apps: Vec::new(),
            tenant_apps: Vec::new(),
            public_schema_urlconf: None,
            www_prefix_strip: true,
            session_tenancy: false,
            host_policy: HostPolicy::Strict,
            session_key_prefix: "armature.session".to_string(),
        }
    }
}

impl TenancyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| TenantError::Config(format!("TOML parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TenantError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Defaults overridden by `TENANCY_*` variables, after loading `.env`.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();
        config.apply_vars(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from a variable lookup (keys carry [`ENV_PREFIX`]).
    pub fn apply_vars<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(v) = var("PUBLIC_SCHEMA_NAME") {
            self.public_schema_name = v;
        }
        if let Some(v) = var("DEFAULT_TENANT_SCHEMA") {
            self.default_tenant_schema = Some(v).filter(|s| !s.is_empty());
        }
        if let Some(v) = var("RESTRICT_TENANT_TO_HOST") {
            self.restrict_tenant_to_host = parse_bool("RESTRICT_TENANT_TO_HOST", &v)?;
        }
        if let Some(v) = var("SHARED_APPS") {
            self.shared_apps = parse_list(&v);
        }
        if let Some(v) = var("TENANT_APPS") {
            self.tenant_apps = parse_list(&v);
        }
        if let Some(v) = var("PUBLIC_SCHEMA_URLCONF") {
            self.public_schema_urlconf = Some(v).filter(|s| !s.is_empty());
        }
        if let Some(v) = var("WWW_PREFIX_STRIP") {
            self.www_prefix_strip = parse_bool("WWW_PREFIX_STRIP", &v)?;
        }
        if let Some(v) = var("SESSION_TENANCY") {
            self.session_tenancy = parse_bool("SESSION_TENANCY", &v)?;
        }
        if let Some(v) = var("HOST_POLICY") {
            self.host_policy = v.parse()?;
        }
        if let Some(v) = var("SESSION_KEY_PREFIX") {
            self.session_key_prefix = v;
        }
        Ok(())
    }

    /// Reject settings that would make resolution or routing ambiguous.
    pub fn validate(&self) -> Result<()> {
        validate_schema_name(&self.public_schema_name)
            .map_err(|e| TenantError::Config(format!("public_schema_name: {}", e)))?;

        if let Some(default) = &self.default_tenant_schema {
            validate_schema_name(default)
                .map_err(|e| TenantError::Config(format!("default_tenant_schema: {}", e)))?;
        }

        for app in self.shared_apps.iter().chain(&self.tenant_apps) {
            if app_label(app).is_empty() {
                return Err(TenantError::Config(format!("Invalid app entry: '{}'", app)));
            }
        }
        Ok(())
    }

    pub fn is_public(&self, schema_name: &str) -> bool {
        schema_name == self.public_schema_name
    }

    pub fn with_public_schema_name(mut self, name: impl Into<String>) -> Self {
        self.public_schema_name = name.into();
        self
    }

    pub fn with_default_tenant_schema(mut self, schema: impl Into<String>) -> Self {
        self.default_tenant_schema = Some(schema.into());
        self
    }

    pub fn with_restrict_tenant_to_host(mut self, restrict: bool) -> Self {
        self.restrict_tenant_to_host = restrict;
        self
    }

    pub fn with_shared_apps<I, S>(mut self, apps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shared_apps = apps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tenant_apps<I, S>(mut self, apps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tenant_apps = apps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_public_schema_urlconf(mut self, urlconf: impl Into<String>) -> Self {
        self.public_schema_urlconf = Some(urlconf.into());
        self
    }

    pub fn with_www_prefix_strip(mut self, strip: bool) -> Self {
        self.www_prefix_strip = strip;
        self
    }

    pub fn with_session_tenancy(mut self, enabled: bool) -> Self {
        self.session_tenancy = enabled;
        self
    }

    pub fn with_host_policy(mut self, policy: HostPolicy) -> Self {
        self.host_policy = policy;
        self
    }
}

/// App label of an installed-app entry: the last dotted segment.
///
/// ```
/// use armature_tenant_schemas::config::app_label;
///
/// assert_eq!(app_label("django.contrib.auth"), "auth");
/// assert_eq!(app_label("orders"), "orders");
/// ```
pub fn app_label(entry: &str) -> &str {
    entry.rsplit('.').next().unwrap_or(entry).trim()
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(TenantError::Config(format!(
            "{}{} must be a boolean, got '{}'",
            ENV_PREFIX, name, other
        ))),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
