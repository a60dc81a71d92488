//! Builds a fully resolved component tree from a ready surface.
//!
//! Children are found through `child`, any other `...Child` string property,
//! and `children.explicitList`. Every other property is deep-resolved against
//! the data model. A structural reference that points nowhere is an error
//! here, unlike a data binding, which just resolves to `null`.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::binding;
use crate::components::ComponentRecord;
use crate::error::RenderError;
use crate::surface::Surface;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderNode {
    pub id: String,
    #[serde(rename = "type")]
    pub component_type: String,
    pub properties: Map<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<RenderNode>,
}

pub fn build_tree(surface: &Surface) -> Result<RenderNode, RenderError> {
    if !surface.is_ready() {
        return Err(RenderError::NotReady {
            surface_id: surface.surface_id.clone(),
            status: surface.status,
        });
    }

    let root_id = surface
        .root_id
        .as_deref()
        .ok_or_else(|| RenderError::MissingRoot {
            surface_id: surface.surface_id.clone(),
        })?;

    let mut builder = TreeBuilder {
        surface,
        data: surface.data_model.tree(),
        ancestors: Vec::new(),
    };
    builder.node(root_id, None)
}

struct TreeBuilder<'a> {
    surface: &'a Surface,
    data: &'a Value,
    ancestors: Vec<&'a str>,
}

impl<'a> TreeBuilder<'a> {
    fn node(&mut self, id: &'a str, parent: Option<&str>) -> Result<RenderNode, RenderError> {
        if self.ancestors.contains(&id) {
            return Err(RenderError::Cycle { id: id.to_string() });
        }

        let record = self
            .surface
            .components
            .get(id)
            .ok_or_else(|| RenderError::MissingComponent {
                id: id.to_string(),
                parent: parent.map(str::to_string),
            })?;

        let (child_ids, properties) = split_structure(record);

        self.ancestors.push(id);
        let children = child_ids
            .into_iter()
            .map(|child_id| self.node(child_id, Some(id)))
            .collect::<Result<Vec<_>, _>>();
        self.ancestors.pop();

        Ok(RenderNode {
            id: record.id.clone(),
            component_type: record.component_type.clone(),
            properties: binding::resolve_map_in(&properties, self.data),
            children: children?,
        })
    }
}

/// Separates child references from the remaining properties.
fn split_structure(record: &ComponentRecord) -> (Vec<&str>, Map<String, Value>) {
    let mut child_ids = Vec::new();
    let mut properties = Map::new();

    for (key, value) in &record.properties {
        match (key.as_str(), value) {
            ("children", Value::Object(children)) if children.contains_key("explicitList") => {
                let list = children.get("explicitList").and_then(Value::as_array);
                child_ids.extend(list.into_iter().flatten().filter_map(Value::as_str));
            }
            (name, Value::String(child_id)) if name == "child" || name.ends_with("Child") => {
                child_ids.push(child_id.as_str());
            }
            _ => {
                properties.insert(key.clone(), value.clone());
            }
        }
    }

    (child_ids, properties)
}
