//! conhub - Multi-tenant console session hub.
//!
//! The server-side core of a console host: sessions (one logical
//! console shared by any number of client connections), the
//! attach/detach protocol, per-connection handle tables, control-signal
//! broadcast to process groups, and output flow control.
//!
//! ## Shape
//!
//! - [`registry::SessionRegistry`] creates sessions, admits clients,
//!   and publishes lifecycle events.
//! - [`session::Session`] owns the shared console state behind a
//!   reference-counted lifetime; the drop of the last reference tears
//!   the session down.
//! - [`connection::Connection`] is one client's view: an ambient
//!   attachment plus a capability table of input and output handles.
//! - [`backend::PresentationBackend`] is the seam a display layer
//!   implements; servers without one run [`backend::HeadlessBackend`].

pub mod backend;
pub mod broadcast;
pub mod config;
pub mod connection;
pub mod error;
pub mod flow;
pub mod handles;
pub mod history;
pub mod input;
pub mod mode;
pub mod registry;
pub mod session;
pub mod surface;

pub use backend::{HeadlessBackend, PresentationBackend, ShowHint};
pub use broadcast::{ControlDelivery, ControlSink, CtrlSignal, DeliveryOutcome};
pub use config::ServerConfig;
pub use connection::{ClientId, Connection};
pub use error::{ConsoleError, Result};
pub use registry::{AttachReply, AttachRequest, SessionEvent, SessionRegistry};
pub use session::{Session, SessionId, SessionRef};
