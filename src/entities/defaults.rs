//! Built-in entities and the loaders for dynamically discovered kinds

use super::EntityDescriptor;
use crate::error::TransportError;
use crate::transport::{ApiRequest, Transport};
use log::debug;
use serde_json::Value;

/// Descriptors of the `root` kind, available without any network call
pub fn default_entities() -> Vec<EntityDescriptor> {
    vec![
        EntityDescriptor::new("root", "base", "").with_label("Base"),
        EntityDescriptor::new("root", "site", "/wp/v2/settings").with_label("Site"),
        EntityDescriptor::new("root", "postType", "/wp/v2/types")
            .with_key("slug")
            .with_edit_context()
            .with_label("Post Type"),
        EntityDescriptor::new("root", "media", "/wp/v2/media")
            .with_edit_context()
            .with_plural("mediaItems")
            .with_label("Media"),
        EntityDescriptor::new("root", "taxonomy", "/wp/v2/taxonomies")
            .with_key("slug")
            .with_edit_context()
            .with_plural("taxonomies")
            .with_label("Taxonomy"),
        EntityDescriptor::new("root", "sidebar", "/wp/v2/sidebars")
            .with_plural("sidebars")
            .with_transient_edits(&["blocks"])
            .with_label("Widget areas"),
        EntityDescriptor::new("root", "widget", "/wp/v2/widgets")
            .with_plural("widgets")
            .with_transient_edits(&["blocks"])
            .with_label("Widgets"),
        EntityDescriptor::new("root", "widgetType", "/wp/v2/widget-types")
            .with_plural("widgetTypes")
            .with_label("Widget types"),
        EntityDescriptor::new("root", "user", "/wp/v2/users")
            .with_plural("users")
            .with_label("User"),
        EntityDescriptor::new("root", "comment", "/wp/v2/comments")
            .with_plural("comments")
            .with_label("Comment"),
        EntityDescriptor::new("root", "menu", "/__experimental/menus")
            .with_plural("menus")
            .with_label("Menu"),
        EntityDescriptor::new("root", "menuItem", "/__experimental/menu-items")
            .with_plural("menuItems")
            .with_label("Menu Item"),
        EntityDescriptor::new("root", "menuLocation", "/__experimental/menu-locations")
            .with_key("name")
            .with_plural("menuLocations")
            .with_label("Menu Location"),
    ]
}

/// Kinds whose entities are discovered from the REST API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindLoader {
    /// One entity per registered post type
    PostTypes,
    /// One entity per registered taxonomy
    Taxonomies,
}

impl KindLoader {
    pub fn for_kind(kind: &str) -> Option<Self> {
        match kind {
            "postType" => Some(KindLoader::PostTypes),
            "taxonomy" => Some(KindLoader::Taxonomies),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            KindLoader::PostTypes => "postType",
            KindLoader::Taxonomies => "taxonomy",
        }
    }

    fn path(&self) -> &'static str {
        match self {
            KindLoader::PostTypes => "/wp/v2/types?context=edit",
            KindLoader::Taxonomies => "/wp/v2/taxonomies?context=edit",
        }
    }

    /// Fetch the kind's resource listing and turn it into descriptors
    pub async fn load(&self, transport: &dyn Transport) -> Result<Vec<EntityDescriptor>, TransportError> {
        debug!("Loading entities for kind '{}'", self.kind());
        let listing = transport.request(ApiRequest::get(self.path())).await?;
        let entities = self.descriptors_from_listing(&listing)?;
        debug!("Loaded {} entities for kind '{}'", entities.len(), self.kind());
        Ok(entities)
    }

    fn descriptors_from_listing(&self, listing: &Value) -> Result<Vec<EntityDescriptor>, TransportError> {
        let items: Vec<(String, &Value)> = match listing {
            Value::Object(map) => map.iter().map(|(slug, item)| (slug.clone(), item)).collect(),
            Value::Array(items) => items
                .iter()
                .filter_map(|item| {
                    item.get("slug")
                        .and_then(Value::as_str)
                        .map(|slug| (slug.to_string(), item))
                })
                .collect(),
            other => {
                return Err(TransportError::InvalidResponse(format!(
                    "expected a {} listing, got {}",
                    self.kind(),
                    other
                )))
            }
        };

        Ok(items
            .into_iter()
            .map(|(name, item)| self.descriptor_for(name, item))
            .collect())
    }

    fn descriptor_for(&self, name: String, item: &Value) -> EntityDescriptor {
        let rest_base = item
            .get("rest_base")
            .and_then(Value::as_str)
            .unwrap_or(name.as_str())
            .to_string();
        let label = item
            .pointer("/labels/singular_name")
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut entity = EntityDescriptor::new(self.kind(), name, format!("/wp/v2/{}", rest_base));
        if let Some(label) = label {
            entity = entity.with_label(label);
        }
        match self {
            KindLoader::PostTypes => entity
                .with_transient_edits(&["blocks", "selection"])
                .with_merged_edits(&["meta"]),
            KindLoader::Taxonomies => entity,
        }
    }
}
