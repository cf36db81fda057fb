//! Manifest source.
//!
//! Queries the backend for every installed plugin's manifest. Discovery
//! failures never propagate: a host without plugins must still boot.

use std::collections::HashSet;

use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;

use crate::client::PanelClient;
use crate::manifest::PluginManifest;
use crate::{MANIFESTS_PATH, Result};

#[derive(Debug, Deserialize)]
struct ManifestList {
    #[serde(default)]
    plugins: Vec<Value>,
}

/// Fetches plugin manifests from the backend.
#[derive(Debug, Clone)]
pub struct ManifestSource {
    client: PanelClient,
}

impl ManifestSource {
    pub fn new(client: PanelClient) -> Self {
        Self { client }
    }

    /// Fetch all manifests. Returns an empty list on failure.
    ///
    /// Invalid entries and repeated ids are skipped with a warning.
    pub async fn fetch_manifests(&self) -> Vec<PluginManifest> {
        match self.try_fetch_manifests().await {
            Ok(manifests) => {
                tracing::info!(count = manifests.len(), "Fetched plugin manifests");
                manifests
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to fetch plugin manifests");
                Vec::new()
            }
        }
    }

    /// Fetch all manifests, reporting transport and envelope errors.
    pub async fn try_fetch_manifests(&self) -> Result<Vec<PluginManifest>> {
        let value = self.client.request(Method::GET, MANIFESTS_PATH, None).await?;
        let list: ManifestList = serde_json::from_value(value)?;

        let mut seen = HashSet::new();
        let mut manifests = Vec::with_capacity(list.plugins.len());

        for raw in list.plugins {
            let manifest = match serde_json::from_value::<PluginManifest>(raw) {
                Ok(manifest) => manifest,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unparsable plugin manifest");
                    continue;
                }
            };

            if let Err(e) = manifest.validate() {
                tracing::warn!(plugin_id = %manifest.id, error = %e, "Skipping invalid plugin manifest");
                continue;
            }

            if !seen.insert(manifest.id.clone()) {
                tracing::warn!(plugin_id = %manifest.id, "Skipping duplicate plugin manifest");
                continue;
            }

            manifests.push(manifest);
        }

        Ok(manifests)
    }
}
