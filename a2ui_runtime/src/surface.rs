//! Per-surface lifecycle: `Buffering -> Ready -> Deleted`.
//!
//! Updates that arrive before `beginRendering` are queued untouched and
//! replayed, in arrival order, when the surface becomes ready. After that the
//! queue stays empty for the life of the surface.

use std::collections::VecDeque;
use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::components::ComponentStore;
use crate::data_model::DataModel;
use crate::error::ComponentError;
use crate::protocol::{BeginRendering, ComponentDefinition, DataModelUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceStatus {
    Buffering,
    Ready,
    Deleted,
}

impl fmt::Display for SurfaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SurfaceStatus::Buffering => "buffering",
            SurfaceStatus::Ready => "ready",
            SurfaceStatus::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

/// An update held back until the surface is ready.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingUpdate {
    Components(Vec<ComponentDefinition>),
    Data(DataModelUpdate),
}

/// What happened to an update handed to a surface.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Buffered,
    Applied { rejected: Vec<ComponentError> },
    /// The surface is deleted; nothing was touched.
    Dropped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Surface {
    pub surface_id: String,
    pub status: SurfaceStatus,
    pub root_id: Option<String>,
    pub catalog_id: String,
    pub styles: Map<String, Value>,
    pub components: ComponentStore,
    pub data_model: DataModel,
    pending: VecDeque<PendingUpdate>,
}

impl Surface {
    /// A surface first referenced by an update, waiting for `beginRendering`.
    pub fn buffering(surface_id: impl Into<String>, default_catalog_id: &str) -> Self {
        Self {
            surface_id: surface_id.into(),
            status: SurfaceStatus::Buffering,
            root_id: None,
            catalog_id: default_catalog_id.to_string(),
            styles: Map::new(),
            components: ComponentStore::new(),
            data_model: DataModel::new(),
            pending: VecDeque::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == SurfaceStatus::Ready
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Promotes the surface to ready (or re-roots it if it already is) and
    /// replays anything that was buffered.
    ///
    /// Existing components and data are kept; only root, catalog and styles
    /// come from the message.
    pub fn begin_rendering(
        &mut self,
        msg: BeginRendering,
        default_catalog_id: &str,
    ) -> Vec<ComponentError> {
        debug!(
            surface_id = %self.surface_id,
            from = %self.status,
            root = %msg.root,
            buffered = self.pending.len(),
            "begin rendering"
        );

        self.status = SurfaceStatus::Ready;
        self.root_id = Some(msg.root);
        self.catalog_id = msg
            .catalog_id
            .unwrap_or_else(|| default_catalog_id.to_string());
        self.styles = msg.styles.unwrap_or_default();

        let mut rejected = Vec::new();
        while let Some(update) = self.pending.pop_front() {
            rejected.extend(self.apply(update));
        }
        rejected
    }

    /// Buffers or applies an update depending on the current status.
    pub fn update(&mut self, update: PendingUpdate) -> UpdateOutcome {
        match self.status {
            SurfaceStatus::Buffering => {
                self.pending.push_back(update);
                UpdateOutcome::Buffered
            }
            SurfaceStatus::Ready => UpdateOutcome::Applied {
                rejected: self.apply(update),
            },
            SurfaceStatus::Deleted => UpdateOutcome::Dropped,
        }
    }

    /// Marks the surface deleted. Returns `false` if it already was.
    pub fn mark_deleted(&mut self) -> bool {
        if self.status == SurfaceStatus::Deleted {
            return false;
        }

        debug!(surface_id = %self.surface_id, from = %self.status, "surface deleted");
        self.status = SurfaceStatus::Deleted;
        self.pending.clear();
        true
    }

    fn apply(&mut self, update: PendingUpdate) -> Vec<ComponentError> {
        match update {
            PendingUpdate::Components(definitions) => {
                self.components.apply_definitions(&definitions)
            }
            PendingUpdate::Data(msg) => {
                self.data_model
                    .apply_update(msg.path.as_deref(), &msg.contents);
                Vec::new()
            }
        }
    }
}
