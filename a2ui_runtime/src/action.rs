use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::binding;
use crate::error::ActionError;
use crate::surface::Surface;

/// A user interaction reported upstream, with its context already resolved
/// against the surface's data model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAction {
    pub name: String,
    pub surface_id: String,
    pub source_component_id: String,
    pub timestamp: String,
    pub context: Map<String, Value>,
}

/// Builds the action declared by a component's `action` property.
///
/// The property is either a bare name (`"play"`) or
/// `{"name": "...", "context": [{"key": "...", "value": <bound value>}]}`;
/// `context` may also be a plain map of bound values.
pub fn build_user_action(
    surface: &Surface,
    component_id: &str,
    timestamp: DateTime<Utc>,
) -> Result<UserAction, ActionError> {
    let component = surface
        .components
        .get(component_id)
        .ok_or_else(|| ActionError::UnknownComponent {
            component_id: component_id.to_string(),
        })?;

    let (name, context) = match component.property("action") {
        Some(Value::String(name)) => (name.clone(), Map::new()),
        Some(Value::Object(definition)) => {
            let name = definition
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| ActionError::MissingName {
                    component_id: component_id.to_string(),
                })?;
            (
                name.to_string(),
                resolve_context(definition.get("context"), surface),
            )
        }
        _ => {
            return Err(ActionError::MissingAction {
                component_id: component_id.to_string(),
            });
        }
    };

    Ok(UserAction {
        name,
        surface_id: surface.surface_id.clone(),
        source_component_id: component_id.to_string(),
        timestamp: timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        context,
    })
}

fn resolve_context(raw: Option<&Value>, surface: &Surface) -> Map<String, Value> {
    let resolve =
        |bound: &Value| binding::resolve(bound, &surface.data_model).unwrap_or(Value::Null);

    match raw {
        Some(Value::Array(entries)) => entries
            .iter()
            .filter_map(|entry| {
                let Some(key) = entry.get("key").and_then(Value::as_str) else {
                    warn!(
                        surface_id = %surface.surface_id,
                        "skipping action context entry without key"
                    );
                    return None;
                };
                let value = entry.get("value").map(resolve).unwrap_or(Value::Null);
                Some((key.to_string(), value))
            })
            .collect(),
        Some(Value::Object(entries)) => entries
            .iter()
            .map(|(key, bound)| (key.clone(), resolve(bound)))
            .collect(),
        _ => Map::new(),
    }
}
