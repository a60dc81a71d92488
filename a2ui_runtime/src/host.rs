//! Headless host: reads framed messages, drives a [`MessageProcessor`] and
//! writes render snapshots and user actions back out.
//!
//! ```text
//! input -> reader thread -> channel -> dispatch loop (owns processor)
//!                                          -> bounded queue -> writer thread -> output
//! ```
//!
//! Besides server messages the input may carry scripted client interactions:
//! `{"type":"interact","surfaceId":"s","componentId":"btn"}` and
//! `{"type":"setData","surfaceId":"s","path":"/name","value":"Ada"}`.

use std::cell::RefCell;
use std::io::{BufRead, Write};
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender, TrySendError};
use std::thread;
use std::time::Instant;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{RuntimeConfig, parse_positive};
use crate::error::ProtocolError;
use crate::processor::{ALL_SURFACES, MessageProcessor};
use crate::protocol::{
    ClientEvent, DEFAULT_MAX_FRAME_BYTES, FrameReader, Framing, ServerMessage, decode_message,
    write_payload,
};
use crate::render::{RenderNode, build_tree};
use crate::surface::SurfaceStatus;

pub const DEFAULT_OUTBOUND_QUEUE_CAP: usize = 256;

pub const FRAMING_ENV: &str = "A2UI_FRAMING";
pub const MAX_FRAME_BYTES_ENV: &str = "A2UI_MAX_FRAME_BYTES";
pub const OUTBOUND_QUEUE_CAP_ENV: &str = "A2UI_OUTBOUND_QUEUE_CAP";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    pub framing: Framing,
    pub max_frame_bytes: usize,
    pub outbound_queue_cap: usize,
    pub runtime: RuntimeConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            framing: Framing::default(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            outbound_queue_cap: DEFAULT_OUTBOUND_QUEUE_CAP,
            runtime: RuntimeConfig::default(),
        }
    }
}

impl HostConfig {
    /// Reads the `A2UI_*` variables. Missing or invalid values keep their
    /// defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            framing: lookup(FRAMING_ENV)
                .and_then(|raw| raw.trim().parse().ok())
                .unwrap_or(defaults.framing),
            max_frame_bytes: parse_positive(lookup(MAX_FRAME_BYTES_ENV))
                .unwrap_or(defaults.max_frame_bytes),
            outbound_queue_cap: parse_positive(lookup(OUTBOUND_QUEUE_CAP_ENV))
                .unwrap_or(defaults.outbound_queue_cap),
            runtime: RuntimeConfig::from_lookup(lookup),
        }
    }
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),
}

/// Counters reported when the host shuts down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostStats {
    pub messages: u64,
    pub actions: u64,
    pub dropped_events: u64,
}

/// One decoded input frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(ServerMessage),
    Interact {
        surface_id: String,
        component_id: String,
    },
    SetData {
        surface_id: String,
        path: String,
        value: Value,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InteractBody {
    surface_id: String,
    component_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetDataBody {
    surface_id: String,
    path: String,
    #[serde(default)]
    value: Value,
}

pub fn decode_inbound(payload: &[u8]) -> Result<Inbound, ProtocolError> {
    let raw: Value = serde_json::from_slice(payload)?;

    match raw.get("type").and_then(Value::as_str) {
        Some("interact") => {
            let body: InteractBody = serde_json::from_value(raw)?;
            Ok(Inbound::Interact {
                surface_id: body.surface_id,
                component_id: body.component_id,
            })
        }
        Some("setData") => {
            let body: SetDataBody = serde_json::from_value(raw)?;
            Ok(Inbound::SetData {
                surface_id: body.surface_id,
                path: body.path,
                value: body.value,
            })
        }
        _ => decode_message(raw).map(Inbound::Message),
    }
}

/// Host notifications about surface state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum HostEvent {
    Render {
        surface_id: String,
        version: u64,
        status: SurfaceStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        root: Option<RenderNode>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Removed {
        surface_id: String,
        version: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    Host(HostEvent),
    Client(ClientEvent),
}

/// Runs the host until `input` is exhausted and every queued event is
/// written.
pub fn run<R, W>(input: R, output: W, config: HostConfig) -> Result<HostStats, HostError>
where
    R: BufRead + Send + 'static,
    W: Write + Send + 'static,
{
    info!(
        framing = %config.framing,
        max_frame_bytes = config.max_frame_bytes,
        outbound_queue_cap = config.outbound_queue_cap,
        "host starting"
    );

    let (inbound_tx, inbound_rx) = mpsc::channel();
    let (outbound_tx, outbound_rx) = mpsc::sync_channel(config.outbound_queue_cap);

    let framing = config.framing;
    let max_frame_bytes = config.max_frame_bytes;
    let reader_handle =
        thread::spawn(move || reader_loop(input, framing, max_frame_bytes, inbound_tx));
    let writer_handle =
        thread::spawn(move || writer_loop(output, outbound_rx, framing, max_frame_bytes));

    let mut queue = OutboundQueue::new(outbound_tx, config.outbound_queue_cap);
    let mut stats = dispatch_loop(inbound_rx, &mut queue, config.runtime);
    stats.dropped_events = queue.dropped;
    drop(queue);

    writer_handle
        .join()
        .map_err(|_| HostError::ThreadPanicked("writer"))??;
    reader_handle
        .join()
        .map_err(|_| HostError::ThreadPanicked("reader"))??;

    info!(
        messages = stats.messages,
        actions = stats.actions,
        dropped_events = stats.dropped_events,
        "host finished"
    );
    Ok(stats)
}

fn reader_loop<R: BufRead>(
    input: R,
    framing: Framing,
    max_frame_bytes: usize,
    tx: Sender<Inbound>,
) -> Result<(), ProtocolError> {
    let mut frames = FrameReader::new(input, framing, max_frame_bytes);

    while let Some(payload) = frames.next_frame()? {
        let inbound = match decode_inbound(&payload) {
            Ok(inbound) => inbound,
            Err(err) => {
                warn!(error = %err, "skipping undecodable frame");
                continue;
            }
        };

        if tx.send(inbound).is_err() {
            break;
        }
    }

    debug!("input closed");
    Ok(())
}

fn writer_loop<W: Write>(
    mut output: W,
    rx: Receiver<Outbound>,
    framing: Framing,
    max_frame_bytes: usize,
) -> Result<(), ProtocolError> {
    for event in rx {
        let payload = serde_json::to_vec(&event)?;
        match write_payload(&mut output, framing, &payload, max_frame_bytes) {
            Ok(()) => {}
            Err(ProtocolError::FrameTooLarge { len, max }) => {
                warn!(len, max, "dropping oversized outbound event");
                continue;
            }
            Err(err) => return Err(err),
        }
        output.flush()?;
    }

    Ok(())
}

fn dispatch_loop(
    rx: Receiver<Inbound>,
    queue: &mut OutboundQueue,
    runtime: RuntimeConfig,
) -> HostStats {
    let mut processor = MessageProcessor::with_config(runtime);
    let changed: Rc<RefCell<Vec<String>>> = Rc::default();
    let sink = Rc::clone(&changed);
    processor.subscribe(move |surface_id| sink.borrow_mut().push(surface_id.to_string()));

    let mut stats = HostStats::default();

    loop {
        let received = match processor.next_purge_deadline() {
            Some(deadline) => {
                rx.recv_timeout(deadline.saturating_duration_since(Instant::now()))
            }
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(Inbound::Message(message)) => {
                stats.messages += 1;
                processor.process(message);
            }
            Ok(Inbound::Interact {
                surface_id,
                component_id,
            }) => match processor.create_action(&surface_id, &component_id) {
                Ok(action) => {
                    stats.actions += 1;
                    queue.send(Outbound::Client(ClientEvent::UserAction(action)));
                }
                Err(err) => warn!(error = %err, "interaction produced no action"),
            },
            Ok(Inbound::SetData {
                surface_id,
                path,
                value,
            }) => {
                processor.set_data(&surface_id, &path, value);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        processor.run_due_purges();
        let pending = std::mem::take(&mut *changed.borrow_mut());
        flush_changes(&processor, pending, queue);
    }

    stats
}

/// Emits one event per changed surface, in first-change order.
fn flush_changes(processor: &MessageProcessor, changed: Vec<String>, queue: &mut OutboundQueue) {
    let mut surface_ids: IndexSet<String> = IndexSet::new();
    for surface_id in changed {
        if surface_id == ALL_SURFACES {
            surface_ids.extend(processor.surface_ids());
        } else {
            surface_ids.insert(surface_id);
        }
    }

    let version = processor.version();
    for surface_id in surface_ids {
        let event = match processor.surface(&surface_id) {
            Some(surface) => {
                let (root, error) = if surface.is_ready() {
                    match build_tree(surface) {
                        Ok(root) => (Some(root), None),
                        Err(err) => (None, Some(err.to_string())),
                    }
                } else {
                    (None, None)
                };
                HostEvent::Render {
                    surface_id,
                    version,
                    status: surface.status,
                    root,
                    error,
                }
            }
            None => HostEvent::Removed {
                surface_id,
                version,
            },
        };
        queue.send(Outbound::Host(event));
    }
}

/// Bounded outbound queue. A full queue drops the event rather than stall
/// the dispatch loop.
struct OutboundQueue {
    tx: SyncSender<Outbound>,
    capacity: usize,
    dropped: u64,
}

impl OutboundQueue {
    fn new(tx: SyncSender<Outbound>, capacity: usize) -> Self {
        Self {
            tx,
            capacity,
            dropped: 0,
        }
    }

    fn send(&mut self, event: Outbound) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_event)) => {
                self.dropped += 1;
                if self.dropped == 1 || self.dropped.is_power_of_two() {
                    warn!(
                        capacity = self.capacity,
                        dropped = self.dropped,
                        "outbound queue full; dropping events"
                    );
                }
                false
            }
            Err(TrySendError::Disconnected(_event)) => {
                warn!("outbound writer is gone; dropping event");
                false
            }
        }
    }
}
