use std::io;

use thiserror::Error;

use crate::surface::SurfaceStatus;

/// A component definition that cannot be stored.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComponentError {
    #[error("component '{id}' names no component type")]
    MissingType { id: String },

    #[error("component '{id}' names more than one component type: {types:?}")]
    AmbiguousType { id: String, types: Vec<String> },

    #[error("component '{id}' of type '{component_type}' has non-object properties")]
    PropertiesNotObject { id: String, component_type: String },
}

/// A write that does not fit the shape of the value it targets.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("'{token}' is not an array index")]
    InvalidIndex { token: String },

    #[error("array index {index} is past the end of an array of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("frame too large: {len} > {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("invalid message payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("message is not a JSON object")]
    NotAnObject,

    #[error("message type field is not a string")]
    InvalidKind,

    #[error("unrecognized message envelope with keys {keys:?}")]
    UnrecognizedEnvelope { keys: Vec<String> },
}

/// Failure to build an outbound user action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("surface '{surface_id}' does not exist")]
    UnknownSurface { surface_id: String },

    #[error("surface '{surface_id}' is {status}, not ready")]
    SurfaceNotReady {
        surface_id: String,
        status: SurfaceStatus,
    },

    #[error("component '{component_id}' does not exist")]
    UnknownComponent { component_id: String },

    #[error("component '{component_id}' has no action")]
    MissingAction { component_id: String },

    #[error("action on component '{component_id}' has no name")]
    MissingName { component_id: String },
}

/// Failure to build a render snapshot. These are structural references a
/// renderer cannot do without.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("surface '{surface_id}' is {status}, not ready")]
    NotReady {
        surface_id: String,
        status: SurfaceStatus,
    },

    #[error("surface '{surface_id}' has no root component")]
    MissingRoot { surface_id: String },

    #[error("component '{id}' is referenced but not defined (parent: {parent:?})")]
    MissingComponent { id: String, parent: Option<String> },

    #[error("component '{id}' is its own ancestor")]
    Cycle { id: String },
}
