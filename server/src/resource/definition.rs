use std::sync::Arc;

use super::hooks::{DefaultHooks, ResourceHooks};
use crate::id::IdGenerator;
use crate::schema::RecordValidator;
use crate::storage::Collection;

/// Static description of a resource type.
#[derive(Clone)]
pub struct ResourceDefinition {
    pub name: String,
    pub collection_path: String,
    pub validator: Arc<dyn RecordValidator>,
    pub unique_fields: Vec<String>,
    pub hooks: Arc<dyn ResourceHooks>,
    /// Overrides the application-wide generator for this resource.
    pub id_generator: Option<Arc<dyn IdGenerator>>,
}

impl ResourceDefinition {
    pub fn new(name: impl Into<String>, validator: impl RecordValidator + 'static) -> Self {
        let name = name.into();
        Self {
            collection_path: format!("{name}s"),
            name,
            validator: Arc::new(validator),
            unique_fields: Vec::new(),
            hooks: Arc::new(DefaultHooks),
            id_generator: None,
        }
    }

    pub fn collection_path(mut self, path: impl Into<String>) -> Self {
        self.collection_path = path.into();
        self
    }

    pub fn unique_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unique_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn hooks(mut self, hooks: impl ResourceHooks + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn id_generator(mut self, generator: impl IdGenerator + 'static) -> Self {
        self.id_generator = Some(Arc::new(generator));
        self
    }

    /// Storage descriptor of the records of this resource.
    pub fn collection(&self) -> Collection {
        Collection::new(self.name.clone()).with_unique_fields(self.unique_fields.clone())
    }
}

impl std::fmt::Debug for ResourceDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceDefinition")
            .field("name", &self.name)
            .field("collection_path", &self.collection_path)
            .field("unique_fields", &self.unique_fields)
            .finish_non_exhaustive()
    }
}
