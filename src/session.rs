//! The session entity: one logical console shared by many connections.
//!
//! A session's lifetime is reference-counted, not owner-driven. Every
//! attached connection and every in-flight operation holds a
//! [`SessionRef`]; the drop that returns the count to zero tears the
//! session down synchronously, exactly once. Acquisition goes through a
//! compare-exchange loop that refuses a zero count, so a dead session
//! stays dead no matter how many stale `Arc`s to it still exist.
//!
//! Locking is two-level and one-directional: a connection's attach lock
//! may be held while taking the session lock, never the reverse. The
//! count is incremented before the session lock is taken and released
//! only after the lock is gone; [`SessionRef::lock`] encodes that order
//! in borrows instead of comments.

use std::collections::VecDeque;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::{broadcast, watch};

use crate::backend::{PresentationBackend, ShowHint};
use crate::broadcast::{ControlSink, CtrlSignal};
use crate::config::SessionDefaults;
use crate::connection::ClientId;
use crate::error::{ConsoleError, Result};
use crate::flow::{FlowGate, PauseFlags};
use crate::history::HistoryBuffer;
use crate::input::InputRecord;
use crate::mode::{is_valid_code_page, HardwareState, InputModes, OutputModes};
use crate::registry::SessionEvent;
use crate::surface::{OutputSurface, SelectionInfo};

/// Numeric session identity, unique for the lifetime of a registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ingredients of one membership entry, supplied at attach time.
#[derive(Clone)]
pub struct MemberInit {
    pub client_id: ClientId,
    pub process_group: u32,
    pub hook: Option<ControlSink>,
}

/// One attached connection as the session sees it.
#[derive(Clone)]
struct Member {
    link: u64,
    client_id: ClientId,
    process_group: u32,
    hook: Option<ControlSink>,
}

/// Registry-side plumbing every session carries: the lifecycle event
/// stream, the live-session census, and the membership policy.
pub(crate) struct RegistryLink {
    pub(crate) events: broadcast::Sender<SessionEvent>,
    pub(crate) census: Arc<AtomicUsize>,
    pub(crate) max_members: usize,
}

/// Everything the session lock protects. The reference count is the one
/// piece of session state that lives outside it.
pub struct SessionState {
    title: String,
    input_mode: InputModes,
    output_mode: OutputModes,
    input_code_page: u32,
    output_code_page: u32,
    hardware_state: HardwareState,
    input_queue: VecDeque<InputRecord>,
    input_ready: Option<watch::Sender<u64>>,
    input_generation: u64,
    active_surface: Option<OutputSurface>,
    surfaces: Vec<OutputSurface>,
    next_surface_id: u64,
    history: Vec<HistoryBuffer>,
    history_capacity: usize,
    members: Vec<Member>,
    next_member_link: u64,
    selection: SelectionInfo,
    flow: FlowGate,
}

impl SessionState {
    fn new(defaults: &SessionDefaults) -> Self {
        SessionState {
            title: defaults.title.clone(),
            input_mode: InputModes::from_bits_truncate(defaults.input_mode),
            output_mode: OutputModes::from_bits_truncate(defaults.output_mode),
            input_code_page: defaults.input_code_page,
            output_code_page: defaults.output_code_page,
            hardware_state: HardwareState::GdiManaged,
            input_queue: VecDeque::new(),
            input_ready: Some(watch::channel(0).0),
            input_generation: 0,
            active_surface: Some(OutputSurface::new(1, defaults.rows, defaults.cols)),
            surfaces: Vec::new(),
            next_surface_id: 2,
            history: Vec::new(),
            history_capacity: defaults.history_capacity,
            members: Vec::new(),
            next_member_link: 1,
            selection: SelectionInfo::default(),
            flow: FlowGate::default(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn input_mode(&self) -> InputModes {
        self.input_mode
    }

    pub fn output_mode(&self) -> OutputModes {
        self.output_mode
    }

    pub fn input_code_page(&self) -> u32 {
        self.input_code_page
    }

    pub fn output_code_page(&self) -> u32 {
        self.output_code_page
    }

    pub fn hardware_state(&self) -> HardwareState {
        self.hardware_state
    }

    pub fn active_surface(&self) -> Option<&OutputSurface> {
        self.active_surface.as_ref()
    }

    pub fn background_surfaces(&self) -> &[OutputSurface] {
        &self.surfaces
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn pending_input(&self) -> usize {
        self.input_queue.len()
    }

    pub fn history_buffers(&self) -> usize {
        self.history.len()
    }

    /// Selection as clients see it: the stored value when its flag word
    /// is non-zero, a zeroed struct otherwise. Whatever an old selection
    /// left behind never leaks out.
    pub fn selection(&self) -> SelectionInfo {
        if self.selection.is_active() {
            self.selection
        } else {
            SelectionInfo::default()
        }
    }

    fn push_member(&mut self, init: MemberInit) -> u64 {
        let link = self.next_member_link;
        self.next_member_link += 1;
        self.members.push(Member {
            link,
            client_id: init.client_id,
            process_group: init.process_group,
            hook: init.hook,
        });
        link
    }

    fn remove_member(&mut self, link: u64) -> Option<Member> {
        let idx = self.members.iter().position(|m| m.link == link)?;
        Some(self.members.remove(idx))
    }
}

/// One logical console: shared properties, queued input, owned
/// surfaces, and the list of attached connections.
pub struct Session {
    id: SessionId,
    refs: AtomicUsize,
    torn_down: AtomicBool,
    state: Mutex<SessionState>,
    backend: Arc<dyn PresentationBackend>,
    registry: RegistryLink,
}

impl Session {
    /// Build a new session with its creator as the first member and the
    /// reference count at one.
    ///
    /// The presentation back end is initialized after the member list is
    /// seeded; a failure there rolls everything back (the census slot
    /// included) and no `cleanup` follows. On success the back end gets
    /// one `redraw` for the freshly attached surface.
    pub(crate) fn create(
        id: SessionId,
        backend: Arc<dyn PresentationBackend>,
        registry: RegistryLink,
        defaults: &SessionDefaults,
        first: MemberInit,
        show: ShowHint,
    ) -> Result<(SessionRef, u64)> {
        let first_client = first.client_id;
        let session = Arc::new(Session {
            id,
            refs: AtomicUsize::new(1),
            torn_down: AtomicBool::new(false),
            state: Mutex::new(SessionState::new(defaults)),
            backend,
            registry,
        });

        let link = session.state.lock().push_member(first);

        if let Err(e) = session.backend.init(&session, show) {
            tracing::warn!(session = %id, error = %e, "presentation backend rejected new session");
            session.registry.census.fetch_sub(1, Ordering::Release);
            return Err(e);
        }

        {
            let state = session.state.lock();
            session.backend.redraw(&session, &state);
        }

        tracing::info!(session = %id, client = first_client, "session created");
        Ok((SessionRef { session }, link))
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current number of counted references.
    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    // ---- properties ----

    pub fn title(&self) -> String {
        self.state.lock().title.clone()
    }

    /// Replace the title and notify the back end under the same lock
    /// hold. A refusing back end surfaces `Unsuccessful`, but the new
    /// title stays applied; the previous buffer is gone either way.
    pub fn set_title(&self, title: String) -> Result<()> {
        let mut state = self.state.lock();
        state.title = title;
        if !self.backend.on_title_changed(self, &state) {
            return Err(ConsoleError::Unsuccessful(
                "title change rejected by presentation backend",
            ));
        }
        Ok(())
    }

    pub fn input_mode(&self) -> InputModes {
        self.state.lock().input_mode
    }

    pub fn set_input_mode(&self, modes: InputModes) {
        self.state.lock().input_mode = modes;
    }

    pub fn output_mode(&self) -> OutputModes {
        self.state.lock().output_mode
    }

    pub fn set_output_mode(&self, modes: OutputModes) {
        self.state.lock().output_mode = modes;
    }

    pub fn input_code_page(&self) -> u32 {
        self.state.lock().input_code_page
    }

    pub fn set_input_code_page(&self, code_page: u32) -> Result<()> {
        if !is_valid_code_page(code_page) {
            return Err(ConsoleError::InvalidParameter(format!(
                "code page {code_page} is not installed"
            )));
        }
        self.state.lock().input_code_page = code_page;
        Ok(())
    }

    pub fn output_code_page(&self) -> u32 {
        self.state.lock().output_code_page
    }

    pub fn set_output_code_page(&self, code_page: u32) -> Result<()> {
        if !is_valid_code_page(code_page) {
            return Err(ConsoleError::InvalidParameter(format!(
                "code page {code_page} is not installed"
            )));
        }
        self.state.lock().output_code_page = code_page;
        Ok(())
    }

    pub fn hardware_state(&self) -> HardwareState {
        self.state.lock().hardware_state
    }

    /// Returns true when the value actually changed.
    pub fn set_hardware_state(&self, next: HardwareState) -> bool {
        let mut state = self.state.lock();
        if state.hardware_state == next {
            return false;
        }
        let prev = state.hardware_state;
        state.hardware_state = next;
        tracing::debug!(session = %self.id, ?prev, ?next, "hardware state changed");
        true
    }

    pub fn selection_info(&self) -> SelectionInfo {
        self.state.lock().selection()
    }

    /// Renderer-side entry point: record the selection clients will be
    /// told about.
    pub fn set_selection(&self, info: SelectionInfo) {
        self.state.lock().selection = info;
    }

    /// Forward an icon change to the back end. Nothing is stored on the
    /// session.
    pub fn set_icon(&self, icon: u64) -> Result<()> {
        if !self.backend.on_icon_changed(self, icon) {
            return Err(ConsoleError::Unsuccessful(
                "icon change rejected by presentation backend",
            ));
        }
        Ok(())
    }

    // ---- input queue ----

    /// Append a record to the FIFO input queue and bump the readiness
    /// generation.
    pub fn post_input(&self, record: InputRecord) {
        let mut state = self.state.lock();
        state.input_queue.push_back(record);
        state.input_generation += 1;
        let generation = state.input_generation;
        if let Some(ready) = &state.input_ready {
            let _ = ready.send(generation);
        }
    }

    pub fn take_input(&self) -> Option<InputRecord> {
        self.state.lock().input_queue.pop_front()
    }

    pub fn pending_input(&self) -> usize {
        self.state.lock().input_queue.len()
    }

    /// Readiness signal carrying the input generation; `None` once the
    /// session is torn down.
    pub fn subscribe_input(&self) -> Option<watch::Receiver<u64>> {
        self.state.lock().input_ready.as_ref().map(|tx| tx.subscribe())
    }

    // ---- history buffers ----

    /// Append a line to the history buffer of `exe`, creating the buffer
    /// on first use.
    pub fn add_history(&self, exe: &str, line: &str) {
        let mut state = self.state.lock();
        let capacity = state.history_capacity;
        match state.history.iter_mut().find(|h| h.exe() == exe) {
            Some(buffer) => buffer.push(line),
            None => {
                let mut buffer = HistoryBuffer::new(exe, capacity);
                buffer.push(line);
                state.history.push(buffer);
            }
        }
    }

    pub fn history_buffers(&self) -> usize {
        self.state.lock().history.len()
    }

    // ---- surfaces ----

    /// Allocate a background surface; it becomes visible only through
    /// [`Session::activate_surface`].
    pub fn create_surface(&self, rows: u16, cols: u16) -> u64 {
        let mut state = self.state.lock();
        let id = state.next_surface_id;
        state.next_surface_id += 1;
        state.surfaces.push(OutputSurface::new(id, rows, cols));
        tracing::debug!(session = %self.id, surface = id, "background surface created");
        id
    }

    /// Swap a background surface in as the active one; the previous
    /// active surface moves to the background set. The back end redraws
    /// from the new surface before the lock is released.
    pub fn activate_surface(&self, id: u64) -> Result<()> {
        let mut state = self.state.lock();
        let idx = state
            .surfaces
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| {
                ConsoleError::InvalidParameter(format!("surface {id} does not exist"))
            })?;
        let next = state.surfaces.swap_remove(idx);
        if let Some(prev) = state.active_surface.replace(next) {
            state.surfaces.push(prev);
        }
        self.backend.redraw(self, &state);
        tracing::debug!(session = %self.id, surface = id, "surface activated");
        Ok(())
    }

    /// Drop a background surface. The active surface cannot be released
    /// while the session lives; it goes last, during teardown.
    pub fn release_surface(&self, id: u64) -> Result<()> {
        let mut state = self.state.lock();
        if state.active_surface.as_ref().map(|s| s.id) == Some(id) {
            return Err(ConsoleError::InvalidState(
                "the active surface cannot be released",
            ));
        }
        let idx = state
            .surfaces
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| {
                ConsoleError::InvalidParameter(format!("surface {id} does not exist"))
            })?;
        state.surfaces.swap_remove(idx);
        Ok(())
    }

    /// Geometry and cursor of the active surface; `None` after teardown.
    pub fn surface_info(&self) -> Option<OutputSurface> {
        self.state.lock().active_surface.clone()
    }

    // ---- membership ----

    pub(crate) fn attach_member(&self, init: MemberInit) -> Result<u64> {
        let mut state = self.state.lock();
        let limit = self.registry.max_members;
        if limit != 0 && state.members.len() >= limit {
            return Err(ConsoleError::ResourceExhausted("session member limit"));
        }
        Ok(state.push_member(init))
    }

    /// Silent removal, used when rolling back a failed attach. The
    /// orderly path is [`Session::detach_member`].
    pub(crate) fn remove_member(&self, link: u64) -> bool {
        self.state.lock().remove_member(link).is_some()
    }

    /// Remove a membership entry and announce the detach.
    pub(crate) fn detach_member(&self, link: u64, client: ClientId) -> bool {
        let removed = self.state.lock().remove_member(link).is_some();
        if removed {
            let _ = self.registry.events.send(SessionEvent::Detached {
                id: self.id,
                client,
            });
        }
        removed
    }

    pub fn member_count(&self) -> usize {
        self.state.lock().members.len()
    }

    /// Enumerate attached client ids in attach order, bounded by
    /// `capacity`. The second value is the total membership, so callers
    /// can tell a truncated answer from a complete one.
    pub fn list_clients(&self, capacity: usize) -> (Vec<ClientId>, usize) {
        let state = self.state.lock();
        let total = state.members.len();
        let ids = state
            .members
            .iter()
            .take(capacity)
            .map(|m| m.client_id)
            .collect();
        (ids, total)
    }

    // ---- control broadcast ----

    /// Deliver `signal` to every member of `group` (0 means every
    /// member), sequentially in attach order, waiting up to `wait` per
    /// target. Individual delivery outcomes are logged and swallowed;
    /// the only failure is a group no member belongs to.
    pub async fn broadcast_ctrl(
        &self,
        signal: CtrlSignal,
        group: u32,
        wait: Duration,
    ) -> Result<usize> {
        let targets: Vec<(ClientId, Option<ControlSink>)> = {
            let state = self.state.lock();
            state
                .members
                .iter()
                .filter(|m| group == 0 || m.process_group == group)
                .map(|m| (m.client_id, m.hook.clone()))
                .collect()
        };
        if targets.is_empty() {
            return Err(ConsoleError::InvalidParameter(format!(
                "no attached client in process group {group}"
            )));
        }

        let matched = targets.len();
        for (client, hook) in targets {
            match hook {
                None => {
                    tracing::debug!(
                        session = %self.id,
                        client,
                        "member has no control hook, skipping"
                    );
                }
                Some(sink) => {
                    let outcome = sink.deliver(signal, wait).await;
                    tracing::debug!(
                        session = %self.id,
                        client,
                        ?signal,
                        ?outcome,
                        "control signal dispatched"
                    );
                }
            }
        }
        Ok(matched)
    }

    // ---- flow control ----

    pub fn pause(&self, reasons: PauseFlags) {
        let mut state = self.state.lock();
        state.flow.pause(reasons);
        tracing::debug!(session = %self.id, flags = ?state.flow.flags(), "output paused");
    }

    pub fn unpause(&self, reasons: PauseFlags) {
        let mut state = self.state.lock();
        if state.flow.unpause(reasons) {
            tracing::debug!(session = %self.id, "output resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().flow.is_paused()
    }

    pub fn pause_flags(&self) -> PauseFlags {
        self.state.lock().flow.flags()
    }

    /// Park until every pause reason is cleared. Returns immediately on
    /// an open gate. Callers hold a [`SessionRef`], so the session
    /// cannot be torn down under a waiter.
    pub async fn wait_until_unpaused(&self) {
        loop {
            let rx = self.state.lock().flow.subscribe();
            let Some(mut rx) = rx else { return };
            let _ = rx.changed().await;
        }
    }

    // ---- teardown ----

    fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut state = self.state.lock();
        let mut drained = 0usize;
        while state.input_queue.pop_front().is_some() {
            drained += 1;
        }
        let history = state.history.len();
        state.history.clear();
        let leftover = state.surfaces.len();
        if leftover > 0 {
            tracing::warn!(
                session = %self.id,
                leftover,
                "background surfaces still present at teardown"
            );
            state.surfaces.clear();
        }
        state.active_surface = None;
        state.input_ready = None;
        state.flow.close();
        state.title.clear();
        drop(state);

        tracing::debug!(session = %self.id, drained, history, "session resources released");
        self.backend.cleanup(self);
        self.registry.census.fetch_sub(1, Ordering::Release);
        let _ = self
            .registry
            .events
            .send(SessionEvent::Destroyed { id: self.id });
        tracing::info!(session = %self.id, "session destroyed");
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("refs", &self.ref_count())
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}

/// Owned counted reference to a session.
///
/// Holding one pins the session: teardown runs only after the last
/// reference drops. The count is incremented before any session lock is
/// taken and decremented strictly after the lock is released, which
/// [`SessionRef::lock`] enforces by borrowing the guard from the
/// reference.
pub struct SessionRef {
    session: Arc<Session>,
}

impl SessionRef {
    /// Take a counted reference, or `None` when the count already hit
    /// zero. Uses a compare-exchange loop so a session racing into
    /// teardown can never be resurrected.
    pub fn acquire(session: &Arc<Session>) -> Option<SessionRef> {
        loop {
            let current = session.refs.load(Ordering::Acquire);
            if current == 0 {
                return None;
            }
            if session
                .refs
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(SessionRef {
                    session: Arc::clone(session),
                });
            }
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Lock the session state for inspection. The guard borrows from
    /// this reference, so the lock is always released before the
    /// reference can drop.
    pub fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.session.state.lock()
    }
}

impl Deref for SessionRef {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl Clone for SessionRef {
    fn clone(&self) -> Self {
        self.session.refs.fetch_add(1, Ordering::AcqRel);
        SessionRef {
            session: Arc::clone(&self.session),
        }
    }
}

impl Drop for SessionRef {
    fn drop(&mut self) {
        if self.session.refs.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.session.teardown();
        }
    }
}

impl fmt::Debug for SessionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionRef({})", self.session.id)
    }
}
