//! Output surfaces and the selection a renderer reports against them.
//!
//! Cell contents and drawing stay out of this crate; a surface here is
//! identity plus geometry plus cursor, which is all the session core
//! needs to own and hand over to a presentation back end.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Cursor shape data carried by every surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorInfo {
    pub visible: bool,
    /// Cell coverage in percent, 1..=100.
    pub size_percent: u8,
}

impl Default for CursorInfo {
    fn default() -> Self {
        CursorInfo {
            visible: true,
            size_percent: 25,
        }
    }
}

/// One drawable buffer owned by a session. The session keeps exactly one
/// active surface for its whole lifetime and may carry additional
/// background surfaces that must be released before teardown.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSurface {
    pub id: u64,
    pub rows: u16,
    pub cols: u16,
    pub cursor: CursorInfo,
}

impl OutputSurface {
    pub fn new(id: u64, rows: u16, cols: u16) -> Self {
        OutputSurface {
            id,
            rows,
            cols,
            cursor: CursorInfo::default(),
        }
    }
}

bitflags! {
    /// State bits of an in-progress or completed selection.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct SelectionFlags: u32 {
        const IN_PROGRESS = 0x1;
        const NOT_EMPTY = 0x2;
        const MOUSE_SELECTION = 0x4;
        const MOUSE_DOWN = 0x8;
    }
}

/// Selection rectangle as reported to clients. An all-zero value means
/// "no selection"; queries return exactly that when no selection is
/// active, regardless of what a previous selection left behind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionInfo {
    pub flags: SelectionFlags,
    /// Anchor cell (column, row).
    pub anchor: (i16, i16),
    /// Covered area as (left, top, right, bottom).
    pub rect: (i16, i16, i16, i16),
}

impl SelectionInfo {
    /// True when the flag word says a selection exists.
    pub fn is_active(&self) -> bool {
        !self.flags.is_empty()
    }
}
