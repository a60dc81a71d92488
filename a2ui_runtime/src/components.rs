use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Number, Value};
use tracing::warn;

use crate::error::ComponentError;
use crate::protocol::ComponentDefinition;

/// A stored component: one type tag plus its raw, unresolved properties.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub component_type: String,
    pub properties: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<Number>,
}

impl ComponentRecord {
    pub fn from_definition(definition: &ComponentDefinition) -> Result<Self, ComponentError> {
        let mut types = definition.component.iter();

        let (component_type, properties) = match (types.next(), types.next()) {
            (Some(only), None) => only,
            (None, _) => {
                return Err(ComponentError::MissingType {
                    id: definition.id.clone(),
                });
            }
            (Some(_), Some(_)) => {
                return Err(ComponentError::AmbiguousType {
                    id: definition.id.clone(),
                    types: definition.component.keys().cloned().collect(),
                });
            }
        };

        let Value::Object(properties) = properties else {
            return Err(ComponentError::PropertiesNotObject {
                id: definition.id.clone(),
                component_type: component_type.clone(),
            });
        };

        Ok(Self {
            id: definition.id.clone(),
            component_type: component_type.clone(),
            properties: properties.clone(),
            weight: definition.weight.clone(),
        })
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}

/// Components of one surface, keyed by id in first-definition order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentStore {
    records: IndexMap<String, ComponentRecord>,
}

impl ComponentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores every well-formed definition, replacing any record with the same
    /// id wholesale. Malformed definitions are logged, skipped and returned.
    pub fn apply_definitions(
        &mut self,
        definitions: &[ComponentDefinition],
    ) -> Vec<ComponentError> {
        let mut rejected = Vec::new();

        for definition in definitions {
            match ComponentRecord::from_definition(definition) {
                Ok(record) => {
                    self.records.insert(record.id.clone(), record);
                }
                Err(err) => {
                    warn!(
                        component_id = %definition.id,
                        error = %err,
                        "skipping invalid component definition"
                    );
                    rejected.push(err);
                }
            }
        }

        rejected
    }

    pub fn get(&self, id: &str) -> Option<&ComponentRecord> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ComponentRecord> {
        self.records.values()
    }
}
