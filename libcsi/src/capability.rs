//! Static capability sets advertised by a plugin.
//!
//! A [`CapabilityRegistry`] is built once when the backend is constructed and
//! never changes afterwards.  The orchestrator queries it to decide which
//! lifecycle calls it may issue; only operations that are actually
//! implemented may be listed.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Capabilities advertised by the Identity service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PluginCapability {
    /// Plugin provides a Controller service.
    ControllerService,
}

/// Operations a Controller service may support.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ControllerCapability {
    CreateDeleteVolume,
    PublishUnpublishVolume,
    ListVolumes,
    GetCapacity,
    CreateDeleteSnapshot,
    ListSnapshots,
    ExpandVolume,
    GetVolume,
}

/// Operations a Node service may support.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeCapability {
    StageUnstageVolume,
    GetVolumeStats,
    ExpandVolume,
}

/// Immutable, process-wide capability lists.
///
/// Cloning is cheap: the lists are shared.
#[derive(Debug, Clone)]
pub struct CapabilityRegistry {
    plugin: Arc<[PluginCapability]>,
    controller: Arc<[ControllerCapability]>,
    node: Arc<[NodeCapability]>,
}

impl CapabilityRegistry {
    pub fn new(
        plugin: impl IntoIterator<Item = PluginCapability>,
        controller: impl IntoIterator<Item = ControllerCapability>,
        node: impl IntoIterator<Item = NodeCapability>,
    ) -> Self {
        Self {
            plugin: dedup(plugin),
            controller: dedup(controller),
            node: dedup(node),
        }
    }

    pub fn plugin(&self) -> &[PluginCapability] {
        &self.plugin
    }

    pub fn controller(&self) -> &[ControllerCapability] {
        &self.controller
    }

    pub fn node(&self) -> &[NodeCapability] {
        &self.node
    }
}

/// Collect `items` keeping the first occurrence of each value.
fn dedup<T: PartialEq>(items: impl IntoIterator<Item = T>) -> Arc<[T]> {
    let mut out: Vec<T> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out.into()
}
