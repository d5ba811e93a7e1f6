use std::collections::HashMap;
use std::sync::Arc;

use super::error::ApiError;
use crate::resource::{ResourceController, ResourceDefinition};
use crate::settings::Settings;
use crate::storage::StorageBackend;

/// Application state shared across handlers
pub struct AppState {
    /// Controllers by collection path
    pub resources: HashMap<String, Arc<ResourceController>>,
    pub storage: Arc<dyn StorageBackend>,
    pub settings: Settings,
}

impl AppState {
    pub fn new(
        settings: Settings,
        storage: Arc<dyn StorageBackend>,
        definitions: Vec<ResourceDefinition>,
    ) -> Self {
        let generator = settings.id_generator.build();
        let resources = definitions
            .into_iter()
            .map(|definition| {
                let path = definition.collection_path.clone();
                let controller = ResourceController::new(
                    definition,
                    Arc::clone(&storage),
                    Arc::clone(&generator),
                )
                .with_timeout(settings.backend_timeout)
                .with_retry_after(settings.retry_after);
                (path, Arc::new(controller))
            })
            .collect();

        Self {
            resources,
            storage,
            settings,
        }
    }

    pub fn resource(&self, collection: &str) -> Result<&ResourceController, ApiError> {
        self.resources
            .get(collection)
            .map(Arc::as_ref)
            .ok_or_else(|| ApiError::UnknownResource(format!("/{collection}")))
    }
}
