//! Session registry: creation, identity, lifecycle events, census.
//!
//! The registry is the only place sessions are born. It owns the shared
//! configuration, hands out connections, admits new sessions against
//! the configured limit, and publishes lifecycle events on a lossy
//! broadcast channel for observers.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::backend::{HeadlessBackend, PresentationBackend, ShowHint};
use crate::broadcast::ControlSink;
use crate::config::ServerConfig;
use crate::connection::{ClientId, Connection};
use crate::error::{ConsoleError, Result};
use crate::handles::{AccessRights, Handle, HandleKind};
use crate::session::{MemberInit, RegistryLink, Session, SessionId, SessionRef};

const EVENT_CHANNEL_DEPTH: usize = 64;

/// Lifecycle notifications. Delivery is lossy for slow receivers; the
/// stream is observability, not state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    Created { id: SessionId },
    Attached { id: SessionId, client: ClientId },
    Detached { id: SessionId, client: ClientId },
    Destroyed { id: SessionId },
}

/// How a connection asks to join a console.
#[derive(Default)]
pub struct AttachRequest {
    /// Join this existing session instead of creating a fresh one.
    pub inherited: Option<Arc<Session>>,
    /// On the reuse path, keep handles inherited out of band instead of
    /// being granted a fresh pair.
    pub inherit_handles: bool,
    /// Where control signals for this client should be delivered.
    pub hook: Option<ControlSink>,
    pub show_hint: ShowHint,
}

/// What a successful attach hands back. The handles are absent when the
/// caller inherited its handles.
pub struct AttachReply {
    pub session: Arc<Session>,
    pub input: Option<Handle>,
    pub output: Option<Handle>,
}

impl fmt::Debug for AttachReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachReply")
            .field("session", &self.session.id())
            .field("input", &self.input)
            .field("output", &self.output)
            .finish()
    }
}

/// Shared factory and directory for sessions. Cheap to clone.
#[derive(Clone)]
pub struct SessionRegistry {
    backend: Arc<dyn PresentationBackend>,
    config: Arc<ServerConfig>,
    next_id: Arc<AtomicU64>,
    live: Arc<AtomicUsize>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionRegistry {
    pub fn new(backend: Arc<dyn PresentationBackend>, config: ServerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_DEPTH);
        SessionRegistry {
            backend,
            config: Arc::new(config),
            next_id: Arc::new(AtomicU64::new(0)),
            live: Arc::new(AtomicUsize::new(0)),
            events,
        }
    }

    /// A registry with no display attached, the default for servers and
    /// the substrate for tests.
    pub fn headless(config: ServerConfig) -> Self {
        Self::new(Arc::new(HeadlessBackend), config)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Number of sessions currently alive.
    pub fn live_sessions(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Build a connection for a client, sized per the configured handle
    /// table capacity.
    pub fn connection(&self, client_id: ClientId, process_group: u32) -> Connection {
        Connection::new(
            client_id,
            process_group,
            self.config.limits.handle_table_capacity,
        )
    }

    /// Claim a census slot for a new session, or refuse at the limit.
    /// Zero means unlimited.
    fn admit_session(&self) -> Result<()> {
        let limit = self.config.limits.max_sessions;
        if limit == 0 {
            self.live.fetch_add(1, Ordering::AcqRel);
            return Ok(());
        }
        loop {
            let current = self.live.load(Ordering::Acquire);
            if current >= limit {
                return Err(ConsoleError::ResourceExhausted("session limit"));
            }
            if self
                .live
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    /// Attach `conn` to a session: the one named in the request, or a
    /// freshly created one.
    ///
    /// The attach lock is held for the whole operation so a connection
    /// can never end up a member of two sessions. Any failure after the
    /// membership was taken rolls everything back; on the create path
    /// that rollback is the drop of the last counted reference, which
    /// tears the fresh session down again.
    pub fn attach(&self, conn: &Connection, request: AttachRequest) -> Result<AttachReply> {
        let mut attach = conn.attach_state();
        if attach.session.is_some() {
            return Err(ConsoleError::InvalidState("connection is already attached"));
        }

        let member = MemberInit {
            client_id: conn.client_id(),
            process_group: conn.process_group(),
            hook: request.hook,
        };

        let created;
        let (session, link) = match request.inherited {
            Some(ref existing) => {
                created = false;
                let session =
                    SessionRef::acquire(existing).ok_or(ConsoleError::InvalidHandle)?;
                let link = session.attach_member(member)?;
                (session, link)
            }
            None => {
                created = true;
                self.admit_session()?;
                let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
                let (session, link) = Session::create(
                    id,
                    self.backend.clone(),
                    RegistryLink {
                        events: self.events.clone(),
                        census: self.live.clone(),
                        max_members: self.config.limits.max_members,
                    },
                    &self.config.defaults,
                    member,
                    request.show_hint,
                )?;
                let _ = self.events.send(SessionEvent::Created { id });
                (session, link)
            }
        };

        let arc = session.session().clone();
        let (input, output) = if created || !request.inherit_handles {
            let rights = AccessRights::READ | AccessRights::WRITE;
            let input = match conn.handles().insert(arc.clone(), HandleKind::Input, rights, true)
            {
                Ok(handle) => handle,
                Err(e) => {
                    session.remove_member(link);
                    drop(session);
                    return Err(e);
                }
            };
            let output =
                match conn.handles().insert(arc.clone(), HandleKind::Output, rights, true) {
                    Ok(handle) => handle,
                    Err(e) => {
                        let _ = conn.handles().release(input);
                        session.remove_member(link);
                        drop(session);
                        return Err(e);
                    }
                };
            (Some(input), Some(output))
        } else {
            (None, None)
        };

        let id = session.id();
        attach.session = Some(session);
        attach.member_link = Some(link);
        drop(attach);

        let _ = self.events.send(SessionEvent::Attached {
            id,
            client: conn.client_id(),
        });
        tracing::info!(
            session = %id,
            client = conn.client_id(),
            created,
            "client attached to session"
        );
        Ok(AttachReply {
            session: arc,
            input,
            output,
        })
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("live", &self.live_sessions())
            .finish()
    }
}
