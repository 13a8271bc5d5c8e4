//! Plugin registry keyed by name and version.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use outpost_types::StepOutput;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{Plugin, PluginError, PluginRequest, PluginRunner, base_plugin_id};
use crate::resolve::{BindingResolver, resolve_typed};

/// Version ordering that understands semver and falls back to plain text.
#[derive(Debug, Clone, PartialEq, Eq)]
struct VersionKey(String);

impl Ord for VersionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (semver::Version::parse(&self.0), semver::Version::parse(&other.0)) {
            (Ok(left), Ok(right)) => left.cmp(&right).then_with(|| self.0.cmp(&other.0)),
            (Ok(_), Err(_)) => Ordering::Greater,
            (Err(_), Ok(_)) => Ordering::Less,
            (Err(_), Err(_)) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for VersionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Registry for connector plugins.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: Arc<RwLock<HashMap<String, BTreeMap<VersionKey, Arc<dyn Plugin>>>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin under its own name and version.
    pub async fn register(&self, plugin: Arc<dyn Plugin>) -> Result<(), PluginError> {
        let name = plugin.name().to_string();
        let version = plugin.version().to_string();
        let mut plugins = self.plugins.write().await;
        let versions = plugins.entry(name.clone()).or_default();
        if versions.contains_key(&VersionKey(version.clone())) {
            return Err(PluginError::AlreadyRegistered { name, version });
        }
        debug!(plugin = %name, version = %version, "registered plugin");
        versions.insert(VersionKey(version), plugin);
        Ok(())
    }

    /// Exact `(name, version)` match, or the latest version when `version` is
    /// absent or not registered.
    pub async fn resolve(&self, name: &str, version: Option<&str>) -> Result<Arc<dyn Plugin>, PluginError> {
        let plugins = self.plugins.read().await;
        let versions = plugins.get(name).ok_or_else(|| PluginError::not_found(name))?;

        if let Some(requested) = version
            && let Some(plugin) = versions.get(&VersionKey(requested.to_string()))
        {
            return Ok(plugin.clone());
        }

        let (latest, plugin) = versions.iter().next_back().ok_or_else(|| PluginError::not_found(name))?;
        if let Some(requested) = version {
            warn!(plugin = %name, requested = %requested, using = %latest.0, "plugin version not supported, using latest");
        }
        Ok(plugin.clone())
    }

    /// Registered `(name, version)` pairs.
    pub async fn list(&self) -> Vec<(String, String)> {
        let plugins = self.plugins.read().await;
        let mut listed: Vec<(String, String)> =
            plugins.iter().flat_map(|(name, versions)| versions.keys().map(move |v| (name.clone(), v.0.clone()))).collect();
        listed.sort();
        listed
    }
}

/// Plugin runner backed by a [`PluginRegistry`].
///
/// Resolves bindings in the action configuration against the authoritative
/// state before handing the step to the plugin.
pub struct RegistryPluginRunner {
    registry: PluginRegistry,
    bindings: Arc<dyn BindingResolver>,
}

impl RegistryPluginRunner {
    pub fn new(registry: PluginRegistry, bindings: Arc<dyn BindingResolver>) -> Self {
        Self { registry, bindings }
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }
}

#[async_trait]
impl PluginRunner for RegistryPluginRunner {
    async fn execute(&self, mut request: PluginRequest) -> anyhow::Result<StepOutput> {
        let name = base_plugin_id(&request.plugin_id).to_string();
        let plugin = self.registry.resolve(&name, request.plugin_version.as_deref()).await?;
        debug!(
            plugin = %name,
            action = %request.action_name,
            version = %plugin.version(),
            "registry runner executing step"
        );
        request.action_configuration = resolve_typed(self.bindings.as_ref(), &request.state, &request.files, &request.action_configuration)?;
        plugin.execute(&request).await
    }
}
