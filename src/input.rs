//! Opaque input records queued on a session.
//!
//! Decoding key and mouse payloads is the transport's business; the
//! session core only preserves arrival order and the record kind so a
//! reader can dispatch without inspecting bytes.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Discriminates the queued event without decoding it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Key,
    Mouse,
    SurfaceResize,
    Menu,
    Focus,
}

/// One event in a session's FIFO input queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputRecord {
    pub kind: InputKind,
    /// Transport-encoded payload, opaque to the server.
    pub payload: Bytes,
}

impl InputRecord {
    pub fn new(kind: InputKind, payload: impl Into<Bytes>) -> Self {
        InputRecord {
            kind,
            payload: payload.into(),
        }
    }

    /// A payload-less event, e.g. a focus change.
    pub fn signal(kind: InputKind) -> Self {
        InputRecord {
            kind,
            payload: Bytes::new(),
        }
    }
}
