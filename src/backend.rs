//! Presentation back end seam.
//!
//! Everything display-shaped (a GUI window, a hardware text screen, a
//! remote renderer) sits behind this trait. The session core calls in at
//! well-defined points and never looks at the result beyond pass/fail,
//! so back ends stay free to post work to their own threads.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::session::{Session, SessionState};

/// Window disposition requested for a freshly created session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShowHint {
    #[default]
    Normal,
    Minimized,
    Hidden,
}

/// Display collaborator for one or more sessions.
///
/// `on_title_changed` and `redraw` run with the session lock held; the
/// `&SessionState` argument is the proof. Implementations must not call
/// back into operations that re-lock the same session from those
/// methods.
pub trait PresentationBackend: Send + Sync {
    /// Bind the back end to a new session. Called once per session,
    /// before any other callback; failure aborts the creation and no
    /// `cleanup` follows.
    fn init(&self, session: &Arc<Session>, show: ShowHint) -> Result<()>;

    /// The session is being torn down. Called exactly once per session
    /// whose `init` succeeded, after its resources are released.
    fn cleanup(&self, session: &Session) {
        let _ = session;
    }

    /// Render the current contents of the active surface.
    fn redraw(&self, session: &Session, state: &SessionState) {
        let _ = (session, state);
    }

    /// The title changed; returning false surfaces the failure to the
    /// caller that set it (the new title stays applied).
    fn on_title_changed(&self, session: &Session, state: &SessionState) -> bool {
        let _ = (session, state);
        true
    }

    /// The icon changed; same contract as the title callback.
    fn on_icon_changed(&self, session: &Session, icon: u64) -> bool {
        let _ = (session, icon);
        true
    }
}

/// Back end for servers without any display: init always succeeds and
/// every notification is accepted. Tests and transport-only deployments
/// run on this.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeadlessBackend;

impl PresentationBackend for HeadlessBackend {
    fn init(&self, session: &Arc<Session>, show: ShowHint) -> Result<()> {
        tracing::debug!(session = %session.id(), ?show, "headless backend attached");
        Ok(())
    }
}
