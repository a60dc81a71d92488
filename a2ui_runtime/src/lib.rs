//! Client-side runtime for the A2UI v0.8 server-driven UI protocol.
//!
//! A [`MessageProcessor`] consumes server messages, keeps per-surface
//! component and data state, and tells subscribers which surfaces changed.
//! [`render::build_tree`] turns a ready surface into a resolved tree for a
//! renderer, and [`host::run`] wires all of it to a framed byte stream.

pub mod action;
pub mod binding;
pub mod clock;
pub mod components;
pub mod config;
pub mod data_model;
pub mod error;
pub mod host;
pub mod pointer;
pub mod processor;
pub mod protocol;
pub mod render;
pub mod surface;

pub use crate::action::UserAction;
pub use crate::config::RuntimeConfig;
pub use crate::error::{ActionError, ComponentError, ProtocolError, RenderError};
pub use crate::processor::{
    ALL_SURFACES, MessageProcessor, SubscriptionId, reset_default_processor,
    with_default_processor,
};
pub use crate::protocol::{ClientEvent, Framing, ServerMessage, decode_message};
pub use crate::surface::{Surface, SurfaceStatus};
pub use serde_json;
