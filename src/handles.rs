//! Per-connection handle table.
//!
//! A handle is a small integer naming a session endpoint (input queue or
//! output surface) plus the access the holder was granted. Resolving a
//! handle takes a counted session reference, so an operation running
//! through a [`LockedHandle`] can never observe the session mid-teardown.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{ConsoleError, Result};
use crate::session::{Session, SessionRef};

bitflags::bitflags! {
    /// What a handle's holder may do with the endpoint behind it.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct AccessRights: u32 {
        const READ = 0x1;
        const WRITE = 0x2;
    }
}

/// Which session endpoint a handle names.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleKind {
    Input,
    Output,
}

/// Opaque handle value handed to clients. Values are table slots and are
/// reused after release; a stale handle resolves to `InvalidHandle`, not
/// to a new session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Handle(u32);

impl Handle {
    pub fn as_raw(self) -> u32 {
        self.0
    }

    pub fn from_raw(raw: u32) -> Self {
        Handle(raw)
    }
}

struct HandleEntry {
    session: Arc<Session>,
    kind: HandleKind,
    access: AccessRights,
    inheritable: bool,
}

/// Slot-indexed handle table, one per connection.
pub struct HandleTable {
    slots: Mutex<Vec<Option<HandleEntry>>>,
    capacity: usize,
}

impl HandleTable {
    pub fn new(capacity: usize) -> Self {
        HandleTable {
            slots: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// Allocate a handle on `session`. The lowest free slot is reused
    /// before the table grows; growth stops at the configured capacity.
    pub fn insert(
        &self,
        session: Arc<Session>,
        kind: HandleKind,
        access: AccessRights,
        inheritable: bool,
    ) -> Result<Handle> {
        let entry = HandleEntry {
            session,
            kind,
            access,
            inheritable,
        };
        let mut slots = self.slots.lock();
        if let Some(idx) = slots.iter().position(|s| s.is_none()) {
            slots[idx] = Some(entry);
            return Ok(Handle(idx as u32));
        }
        if slots.len() >= self.capacity {
            return Err(ConsoleError::ResourceExhausted("handle table capacity"));
        }
        slots.push(Some(entry));
        Ok(Handle((slots.len() - 1) as u32))
    }

    /// Resolve `handle` into a pinned session, checking `access` against
    /// the rights granted at insert time. An unknown or released slot is
    /// `InvalidHandle`; a known slot lacking a requested right is
    /// `AccessDenied`; a slot whose session already died is
    /// `InvalidHandle` as well.
    pub fn lock(&self, handle: Handle, access: AccessRights) -> Result<LockedHandle> {
        let slots = self.slots.lock();
        let entry = slots
            .get(handle.0 as usize)
            .and_then(|s| s.as_ref())
            .ok_or(ConsoleError::InvalidHandle)?;
        if !entry.access.contains(access) {
            return Err(ConsoleError::AccessDenied);
        }
        let session = SessionRef::acquire(&entry.session).ok_or(ConsoleError::InvalidHandle)?;
        Ok(LockedHandle {
            session,
            kind: entry.kind,
        })
    }

    /// Free a slot. The session reference held by the entry drops here,
    /// which may be the drop that tears the session down.
    pub fn release(&self, handle: Handle) -> Result<()> {
        let mut slots = self.slots.lock();
        let slot = slots
            .get_mut(handle.0 as usize)
            .ok_or(ConsoleError::InvalidHandle)?;
        if slot.take().is_none() {
            return Err(ConsoleError::InvalidHandle);
        }
        Ok(())
    }

    /// Drop every handle that points at `session`. Returns how many were
    /// cleared. Used at detach time so a connection leaves nothing
    /// pinning its old session.
    pub fn clear_for(&self, session: &Arc<Session>) -> usize {
        let mut slots = self.slots.lock();
        let mut cleared = 0;
        for slot in slots.iter_mut() {
            if slot
                .as_ref()
                .is_some_and(|e| Arc::ptr_eq(&e.session, session))
            {
                *slot = None;
                cleared += 1;
            }
        }
        cleared
    }

    pub fn len(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a handle was marked inheritable at insert time.
    pub fn is_inheritable(&self, handle: Handle) -> Result<bool> {
        let slots = self.slots.lock();
        slots
            .get(handle.0 as usize)
            .and_then(|s| s.as_ref())
            .map(|e| e.inheritable)
            .ok_or(ConsoleError::InvalidHandle)
    }
}

/// A resolved handle: a counted session reference plus the endpoint
/// kind. Dropping it releases the pin.
pub struct LockedHandle {
    session: SessionRef,
    kind: HandleKind,
}

impl LockedHandle {
    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    pub fn session_ref(&self) -> &SessionRef {
        &self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use tokio::sync::broadcast;

    use crate::backend::{HeadlessBackend, ShowHint};
    use crate::config::SessionDefaults;
    use crate::session::{MemberInit, RegistryLink, SessionId};

    fn live_session(id: u64) -> SessionRef {
        let (events, _) = broadcast::channel(16);
        let (session, _link) = Session::create(
            SessionId(id),
            Arc::new(HeadlessBackend),
            RegistryLink {
                events,
                census: Arc::new(AtomicUsize::new(1)),
                max_members: 64,
            },
            &SessionDefaults::default(),
            MemberInit {
                client_id: 1,
                process_group: 1,
                hook: None,
            },
            ShowHint::Normal,
        )
        .unwrap();
        session
    }

    #[test]
    fn slots_are_reused_lowest_first() {
        let keeper = live_session(1);
        let arc = keeper.session().clone();
        let table = HandleTable::new(8);

        let a = table
            .insert(arc.clone(), HandleKind::Input, AccessRights::READ, false)
            .unwrap();
        let b = table
            .insert(arc.clone(), HandleKind::Output, AccessRights::WRITE, false)
            .unwrap();
        assert_eq!((a.as_raw(), b.as_raw()), (0, 1));

        table.release(a).unwrap();
        let c = table
            .insert(arc, HandleKind::Output, AccessRights::WRITE, true)
            .unwrap();
        assert_eq!(c.as_raw(), 0, "freed slot is reclaimed before growth");
        assert!(table.is_inheritable(c).unwrap());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn capacity_is_enforced() {
        let keeper = live_session(2);
        let arc = keeper.session().clone();
        let table = HandleTable::new(2);

        table
            .insert(arc.clone(), HandleKind::Input, AccessRights::READ, false)
            .unwrap();
        table
            .insert(arc.clone(), HandleKind::Output, AccessRights::WRITE, false)
            .unwrap();
        let err = table
            .insert(arc, HandleKind::Output, AccessRights::WRITE, false)
            .unwrap_err();
        assert!(matches!(err, ConsoleError::ResourceExhausted(_)));
    }

    #[test]
    fn lock_checks_access_and_staleness() {
        let keeper = live_session(3);
        let arc = keeper.session().clone();
        let table = HandleTable::new(8);

        let h = table
            .insert(arc, HandleKind::Output, AccessRights::WRITE, false)
            .unwrap();

        let locked = table.lock(h, AccessRights::WRITE).unwrap();
        assert_eq!(locked.kind(), HandleKind::Output);
        assert_eq!(locked.session_ref().id(), SessionId(3));
        drop(locked);

        assert!(matches!(
            table.lock(h, AccessRights::READ),
            Err(ConsoleError::AccessDenied)
        ));

        table.release(h).unwrap();
        assert!(matches!(
            table.lock(h, AccessRights::WRITE),
            Err(ConsoleError::InvalidHandle)
        ));
        assert!(matches!(
            table.release(h),
            Err(ConsoleError::InvalidHandle)
        ));
        assert!(matches!(
            table.lock(Handle::from_raw(42), AccessRights::READ),
            Err(ConsoleError::InvalidHandle)
        ));
    }

    #[test]
    fn dead_session_makes_handles_stale() {
        let keeper = live_session(4);
        let arc = keeper.session().clone();
        let table = HandleTable::new(8);
        let h = table
            .insert(arc, HandleKind::Input, AccessRights::READ, false)
            .unwrap();

        // The table entry's Arc is uncounted; dropping the last counted
        // reference tears the session down underneath it.
        drop(keeper);
        assert!(matches!(
            table.lock(h, AccessRights::READ),
            Err(ConsoleError::InvalidHandle)
        ));
    }

    #[test]
    fn clear_for_targets_one_session() {
        let keep_a = live_session(5);
        let keep_b = live_session(6);
        let table = HandleTable::new(8);

        table
            .insert(
                keep_a.session().clone(),
                HandleKind::Input,
                AccessRights::READ,
                false,
            )
            .unwrap();
        table
            .insert(
                keep_a.session().clone(),
                HandleKind::Output,
                AccessRights::WRITE,
                false,
            )
            .unwrap();
        let b = table
            .insert(
                keep_b.session().clone(),
                HandleKind::Output,
                AccessRights::WRITE,
                false,
            )
            .unwrap();

        assert_eq!(table.clear_for(keep_a.session()), 2);
        assert_eq!(table.len(), 1);
        assert!(table.lock(b, AccessRights::WRITE).is_ok());
    }
}
