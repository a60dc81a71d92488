//! Entry point for server messages.
//!
//! The processor owns every surface, routes each message to the surface it
//! names, and tells subscribers which surface changed. It is synchronous and
//! single-threaded; callers feeding it from several sources must serialize
//! their calls.

use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use chrono::Utc;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::action::{UserAction, build_user_action};
use crate::clock::{Clock, SystemClock};
use crate::config::RuntimeConfig;
use crate::error::ActionError;
use crate::protocol::{BeginRendering, ServerMessage, decode_message};
use crate::surface::{PendingUpdate, Surface, SurfaceStatus, UpdateOutcome};

/// Surface id passed to subscribers for changes that touch every surface.
pub const ALL_SURFACES: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Box<dyn FnMut(&str)>;

pub struct MessageProcessor<C: Clock = SystemClock> {
    config: RuntimeConfig,
    clock: C,
    surfaces: IndexMap<String, Surface>,
    purge_deadlines: HashMap<String, Instant>,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_subscription: u64,
    version: u64,
}

impl MessageProcessor<SystemClock> {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl Default for MessageProcessor<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> MessageProcessor<C> {
    pub fn with_clock(config: RuntimeConfig, clock: C) -> Self {
        Self {
            config,
            clock,
            surfaces: IndexMap::new(),
            purge_deadlines: HashMap::new(),
            subscribers: Vec::new(),
            next_subscription: 1,
            version: 0,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn process(&mut self, message: ServerMessage) {
        let changed = match message {
            ServerMessage::BeginRendering(msg) => self.handle_begin_rendering(msg),
            ServerMessage::SurfaceUpdate(msg) => {
                self.handle_update(msg.surface_id, PendingUpdate::Components(msg.components))
            }
            ServerMessage::DataModelUpdate(msg) => {
                self.handle_update(msg.surface_id.clone(), PendingUpdate::Data(msg))
            }
            ServerMessage::DeleteSurface(msg) => self.handle_delete(msg.surface_id),
            ServerMessage::Unknown { kind } => {
                warn!(kind = %kind, "ignoring unrecognized message kind");
                None
            }
        };

        if let Some(surface_id) = changed {
            self.bump(&surface_id);
        }
    }

    pub fn process_all(&mut self, messages: impl IntoIterator<Item = ServerMessage>) {
        for message in messages {
            self.process(message);
        }
    }

    /// Decodes and processes a raw message. Undecodable input is logged and
    /// ignored.
    pub fn process_value(&mut self, raw: Value) {
        match decode_message(raw) {
            Ok(message) => self.process(message),
            Err(err) => warn!(error = %err, "ignoring undecodable message"),
        }
    }

    /// A surface by id. Deleted surfaces stay visible until their grace
    /// period elapses.
    pub fn surface(&self, surface_id: &str) -> Option<&Surface> {
        self.surfaces
            .get(surface_id)
            .filter(|surface| !self.is_purge_due(&surface.surface_id))
    }

    pub fn surface_ids(&self) -> Vec<String> {
        self.surfaces
            .keys()
            .filter(|surface_id| !self.is_purge_due(surface_id))
            .cloned()
            .collect()
    }

    /// Increases on every change; suitable for change detection.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Registers a handler called with the id of every changed surface, in
    /// registration order.
    pub fn subscribe(&mut self, handler: impl FnMut(&str) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push((id, Box::new(handler)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(existing, _)| *existing != id);
        self.subscribers.len() != before
    }

    /// Drops every surface and pending purge.
    pub fn clear(&mut self) {
        self.surfaces.clear();
        self.purge_deadlines.clear();
        self.bump(ALL_SURFACES);
    }

    /// Writes a client-side value into a ready surface's data model. Returns
    /// `false`, without notifying, when nothing was written.
    pub fn set_data(&mut self, surface_id: &str, path: &str, value: Value) -> bool {
        let Some(surface) = self
            .surfaces
            .get_mut(surface_id)
            .filter(|surface| surface.is_ready())
        else {
            debug!(surface_id, path, "ignoring local write to a surface that is not ready");
            return false;
        };

        if !surface.data_model.set_local(path, value) {
            return false;
        }
        self.bump(surface_id);
        true
    }

    /// Builds the user action for an interaction with `component_id`.
    pub fn create_action(
        &self,
        surface_id: &str,
        component_id: &str,
    ) -> Result<UserAction, ActionError> {
        let surface = self
            .surface(surface_id)
            .ok_or_else(|| ActionError::UnknownSurface {
                surface_id: surface_id.to_string(),
            })?;

        if !surface.is_ready() {
            return Err(ActionError::SurfaceNotReady {
                surface_id: surface_id.to_string(),
                status: surface.status,
            });
        }

        build_user_action(surface, component_id, Utc::now())
    }

    /// The earliest pending purge, if any.
    pub fn next_purge_deadline(&self) -> Option<Instant> {
        self.purge_deadlines.values().min().copied()
    }

    /// Removes every deleted surface whose grace period has elapsed and
    /// returns how many were removed.
    pub fn run_due_purges(&mut self) -> usize {
        let now = self.clock.now();
        let mut due: Vec<(String, Instant)> = self
            .purge_deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(surface_id, deadline)| (surface_id.clone(), *deadline))
            .collect();
        due.sort_by_key(|(_, deadline)| *deadline);

        for (surface_id, _) in &due {
            self.purge_deadlines.remove(surface_id);
            self.surfaces.shift_remove(surface_id);
            debug!(surface_id = %surface_id, "surface purged");
            self.bump(surface_id);
        }

        due.len()
    }

    fn is_purge_due(&self, surface_id: &str) -> bool {
        self.purge_deadlines
            .get(surface_id)
            .is_some_and(|deadline| *deadline <= self.clock.now())
    }

    fn handle_begin_rendering(&mut self, msg: BeginRendering) -> Option<String> {
        let surface_id = msg.surface_id.clone();
        let default_catalog_id = self.config.default_catalog_id.clone();
        let surface = self.live_surface(&surface_id);

        for err in surface.begin_rendering(msg, &default_catalog_id) {
            debug!(surface_id = %surface_id, error = %err, "buffered definition rejected");
        }

        Some(surface_id)
    }

    fn handle_update(&mut self, surface_id: String, update: PendingUpdate) -> Option<String> {
        match self.live_surface(&surface_id).update(update) {
            UpdateOutcome::Applied { .. } => Some(surface_id),
            UpdateOutcome::Buffered => None,
            UpdateOutcome::Dropped => None,
        }
    }

    fn handle_delete(&mut self, surface_id: String) -> Option<String> {
        let surface = self.surfaces.get_mut(&surface_id)?;
        if !surface.mark_deleted() {
            return None;
        }

        let deadline = self.clock.now() + self.config.purge_delay;
        self.purge_deadlines.insert(surface_id.clone(), deadline);
        Some(surface_id)
    }

    /// The surface a new message should act on. Unknown ids start buffering;
    /// a deleted surface is replaced by a fresh one and its purge cancelled.
    fn live_surface(&mut self, surface_id: &str) -> &mut Surface {
        let deleted = self
            .surfaces
            .get(surface_id)
            .is_some_and(|surface| surface.status == SurfaceStatus::Deleted);

        if deleted {
            debug!(surface_id, "replacing deleted surface");
            self.purge_deadlines.remove(surface_id);
            self.surfaces.shift_remove(surface_id);
        }

        let default_catalog_id = &self.config.default_catalog_id;
        self.surfaces
            .entry(surface_id.to_string())
            .or_insert_with(|| Surface::buffering(surface_id, default_catalog_id))
    }

    fn bump(&mut self, surface_id: &str) {
        self.version += 1;
        self.notify(surface_id);
    }

    fn notify(&mut self, surface_id: &str) {
        for (id, handler) in &mut self.subscribers {
            let result = panic::catch_unwind(AssertUnwindSafe(|| handler(surface_id)));
            if let Err(payload) = result {
                error!(
                    subscription = id.0,
                    surface_id,
                    panic = panic_message(payload.as_ref()),
                    "subscriber panicked"
                );
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

thread_local! {
    static DEFAULT_PROCESSOR: RefCell<Option<MessageProcessor>> = const { RefCell::new(None) };
}

/// Runs `f` against this thread's shared processor, creating it on first use.
///
/// Subscribers of the shared processor must not call back into this function.
pub fn with_default_processor<R>(f: impl FnOnce(&mut MessageProcessor) -> R) -> R {
    DEFAULT_PROCESSOR.with(|cell| {
        let mut slot = cell.borrow_mut();
        f(slot.get_or_insert_with(MessageProcessor::new))
    })
}

/// Clears and discards this thread's shared processor.
pub fn reset_default_processor() {
    let previous = DEFAULT_PROCESSOR.with(|cell| cell.borrow_mut().take());
    if let Some(mut processor) = previous {
        processor.clear();
    }
}
