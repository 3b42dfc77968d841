//! The tools and resources served to assistants, registered into one operation table.

pub mod cards;
pub mod decks;
pub mod media;
pub mod models;
pub mod notes;
pub mod resources;

use bridge_protocol::message::JSON_MIME_TYPE;
use bridge_protocol::{ResourceDescriptor, ToolDescriptor};

use crate::collection::Collection;
use crate::registry::{OperationInfo, OperationTable, OperationTableBuilder, RegistryError};

/// Register every tool and resource. Each module adds its own operations.
pub fn register_all(builder: &mut OperationTableBuilder<Collection>) {
    decks::register(builder);
    models::register(builder);
    notes::register(builder);
    cards::register(builder);
    media::register(builder);
    resources::register(builder);
}

pub fn table() -> Result<OperationTable<Collection>, RegistryError> {
    let mut builder = OperationTable::builder();
    register_all(&mut builder);
    builder.build()
}

/// `tools/list` entries for the given operations. Resources are left out.
pub fn catalog(infos: &[OperationInfo]) -> Vec<ToolDescriptor> {
    infos
        .iter()
        .filter(|info| !info.is_resource())
        .map(|info| ToolDescriptor {
            name: info.name.clone(),
            description: info.description.clone(),
            input_schema: info.input_schema.clone(),
        })
        .collect()
}

/// `resources/list` entries for the given operations.
pub fn resource_catalog(infos: &[OperationInfo]) -> Vec<ResourceDescriptor> {
    infos
        .iter()
        .filter_map(|info| {
            info.resource.as_ref().map(|resource| ResourceDescriptor {
                uri: resource.uri.clone(),
                name: info.name.clone(),
                title: Some(resource.title.clone()),
                description: info.description.clone(),
                mime_type: JSON_MIME_TYPE.to_owned(),
            })
        })
        .collect()
}
