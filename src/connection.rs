//! Per-client connection state and the operation surface clients call.
//!
//! A connection owns two independently locked pieces: the attach state
//! (which session, if any, this client is a member of) and the handle
//! table. Property operations resolve the ambient session by cloning
//! the attached [`SessionRef`] under the attach lock, then work against
//! the session with only that transient reference in hand. The attach
//! lock is never held across an await or across the session lock,
//! except for the short membership edits inside attach and detach.

use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use crate::broadcast::CtrlSignal;
use crate::error::{ConsoleError, Result};
use crate::handles::{AccessRights, Handle, HandleKind, HandleTable};
use crate::input::InputRecord;
use crate::mode::{HardwareState, InputModes, OutputModes};
use crate::session::SessionRef;
use crate::surface::SelectionInfo;

/// Client/process identity as presented at connect time.
pub type ClientId = u32;

/// What the attach lock protects: the current membership, if any.
#[derive(Default)]
pub(crate) struct AttachState {
    pub(crate) session: Option<SessionRef>,
    pub(crate) member_link: Option<u64>,
}

/// One client's server-side state.
pub struct Connection {
    client_id: ClientId,
    process_group: u32,
    attach: Mutex<AttachState>,
    handles: HandleTable,
}

impl Connection {
    pub(crate) fn new(client_id: ClientId, process_group: u32, handle_capacity: usize) -> Self {
        Connection {
            client_id,
            process_group,
            attach: Mutex::new(AttachState::default()),
            handles: HandleTable::new(handle_capacity),
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn process_group(&self) -> u32 {
        self.process_group
    }

    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    pub fn is_attached(&self) -> bool {
        self.attach.lock().session.is_some()
    }

    pub(crate) fn attach_state(&self) -> MutexGuard<'_, AttachState> {
        self.attach.lock()
    }

    /// The ambient path every property operation starts with: clone the
    /// attached reference under the attach lock and let the lock go.
    /// Unattached connections get `InvalidHandle`, same as a stale
    /// handle would.
    pub fn resolve(&self) -> Result<SessionRef> {
        self.attach
            .lock()
            .session
            .clone()
            .ok_or(ConsoleError::InvalidHandle)
    }

    // ---- ambient operations (attachment-scoped) ----

    pub fn title(&self) -> Result<String> {
        Ok(self.resolve()?.title())
    }

    pub fn set_title(&self, title: String) -> Result<()> {
        self.resolve()?.set_title(title)
    }

    pub fn input_code_page(&self) -> Result<u32> {
        Ok(self.resolve()?.input_code_page())
    }

    pub fn set_input_code_page(&self, code_page: u32) -> Result<()> {
        self.resolve()?.set_input_code_page(code_page)
    }

    pub fn output_code_page(&self) -> Result<u32> {
        Ok(self.resolve()?.output_code_page())
    }

    pub fn set_output_code_page(&self, code_page: u32) -> Result<()> {
        self.resolve()?.set_output_code_page(code_page)
    }

    pub fn selection_info(&self) -> Result<SelectionInfo> {
        Ok(self.resolve()?.selection_info())
    }

    pub fn set_selection(&self, info: SelectionInfo) -> Result<()> {
        self.resolve()?.set_selection(info);
        Ok(())
    }

    pub fn set_icon(&self, icon: u64) -> Result<()> {
        self.resolve()?.set_icon(icon)
    }

    pub fn post_input(&self, record: InputRecord) -> Result<()> {
        self.resolve()?.post_input(record);
        Ok(())
    }

    pub fn take_input(&self) -> Result<Option<InputRecord>> {
        Ok(self.resolve()?.take_input())
    }

    pub fn pending_input(&self) -> Result<usize> {
        Ok(self.resolve()?.pending_input())
    }

    pub fn add_history(&self, exe: &str, line: &str) -> Result<()> {
        self.resolve()?.add_history(exe, line);
        Ok(())
    }

    pub fn list_clients(&self, capacity: usize) -> Result<(Vec<ClientId>, usize)> {
        Ok(self.resolve()?.list_clients(capacity))
    }

    /// Broadcast a control signal to a process group of the attached
    /// session. The transient reference is held across the await, so
    /// the session outlives the whole delivery pass even if this
    /// connection detaches concurrently.
    pub async fn broadcast_ctrl(
        &self,
        signal: CtrlSignal,
        group: u32,
        wait: Duration,
    ) -> Result<usize> {
        let session = self.resolve()?;
        session.broadcast_ctrl(signal, group, wait).await
    }

    // ---- handle-based operations ----

    /// Read the mode word of the endpoint the handle designates.
    pub fn handle_mode(&self, handle: Handle) -> Result<u32> {
        let locked = self.handles.lock(handle, AccessRights::READ)?;
        let bits = match locked.kind() {
            HandleKind::Input => locked.session_ref().input_mode().bits(),
            HandleKind::Output => locked.session_ref().output_mode().bits(),
        };
        Ok(bits)
    }

    /// Write the mode word. Bits outside the endpoint's valid mask are
    /// dropped, never rejected.
    pub fn set_handle_mode(&self, handle: Handle, raw: u32) -> Result<()> {
        let locked = self.handles.lock(handle, AccessRights::WRITE)?;
        match locked.kind() {
            HandleKind::Input => locked
                .session_ref()
                .set_input_mode(InputModes::from_bits_truncate(raw)),
            HandleKind::Output => locked
                .session_ref()
                .set_output_mode(OutputModes::from_bits_truncate(raw)),
        }
        Ok(())
    }

    /// Hardware display state is an output-surface property; asking an
    /// input handle for it is the same as asking a bad handle.
    pub fn hardware_state(&self, handle: Handle) -> Result<u32> {
        let locked = self.handles.lock(handle, AccessRights::READ)?;
        if locked.kind() != HandleKind::Output {
            return Err(ConsoleError::InvalidHandle);
        }
        Ok(locked.session_ref().hardware_state().as_raw())
    }

    /// Returns whether the value actually changed.
    pub fn set_hardware_state(&self, handle: Handle, raw: u32) -> Result<bool> {
        let locked = self.handles.lock(handle, AccessRights::WRITE)?;
        if locked.kind() != HandleKind::Output {
            return Err(ConsoleError::InvalidHandle);
        }
        let next = HardwareState::try_from(raw)?;
        Ok(locked.session_ref().set_hardware_state(next))
    }

    // ---- detach ----

    /// Leave the attached session: remove the membership entry, clear
    /// every handle pointing at the session, then release the counted
    /// reference. The attach lock stays held until the handle sweep is
    /// done, so a new attach on this connection cannot land in between;
    /// the final release happens outside the lock, and if it was the
    /// last reference, teardown runs on this thread.
    pub fn detach(&self) -> Result<()> {
        let mut attach = self.attach.lock();
        let (session, link) = match (attach.session.take(), attach.member_link.take()) {
            (Some(session), Some(link)) => (session, link),
            _ => {
                return Err(ConsoleError::InvalidState("connection is not attached"));
            }
        };

        session.detach_member(link, self.client_id);
        let cleared = self.handles.clear_for(session.session());
        tracing::debug!(
            session = %session.id(),
            client = self.client_id,
            cleared,
            "client detached from session"
        );
        drop(attach);

        drop(session);
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let attach = self.attach.get_mut();
        if let (Some(session), Some(link)) = (attach.session.take(), attach.member_link.take()) {
            session.detach_member(link, self.client_id);
            self.handles.clear_for(session.session());
            tracing::debug!(
                session = %session.id(),
                client = self.client_id,
                "connection dropped while attached"
            );
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("client_id", &self.client_id)
            .field("process_group", &self.process_group)
            .field("attached", &self.is_attached())
            .finish()
    }
}
