//! Static lookup from resource type name to provisioner.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::Provisioner;
use crate::model::ResourceType;

/// Closed registry of provisioners.
///
/// Unknown type names are a plain lookup miss; the dispatcher decides what
/// a miss means for each request type.
#[derive(Clone, Default)]
pub struct Registry {
    provisioners: HashMap<ResourceType, Arc<dyn Provisioner>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("types", &self.provisioners.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provisioner under its own resource type.
    #[must_use]
    pub fn with(mut self, provisioner: Arc<dyn Provisioner>) -> Self {
        let resource_type = provisioner.resource_type();
        debug!("Registering provisioner for {resource_type}");
        self.provisioners.insert(resource_type, provisioner);
        self
    }

    /// Looks up a provisioner by resource type name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&dyn Provisioner> {
        let resource_type = name.parse::<ResourceType>().ok()?;
        self.get(resource_type)
    }

    /// Looks up a provisioner by resource type.
    #[must_use]
    pub fn get(&self, resource_type: ResourceType) -> Option<&dyn Provisioner> {
        self.provisioners.get(&resource_type).map(AsRef::as_ref)
    }

    /// Returns the number of registered provisioners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.provisioners.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.provisioners.is_empty()
    }
}
