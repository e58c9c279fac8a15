//! Console mode masks, hardware state, and code-page validation.
//!
//! Mode words travel as raw `u32` at the operation surface and are
//! truncated against the valid mask on the way in: unknown bits are
//! dropped, never rejected. `get` after `set(m)` therefore observes
//! `m & VALID`.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::ConsoleError;

bitflags! {
    /// Mode bits attached to the input side of a session.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct InputModes: u32 {
        const PROCESSED_INPUT = 0x0001;
        const LINE_INPUT = 0x0002;
        const ECHO_INPUT = 0x0004;
        const WINDOW_INPUT = 0x0008;
        const MOUSE_INPUT = 0x0010;
        const INSERT_MODE = 0x0020;
        const QUICK_EDIT_MODE = 0x0040;
        const EXTENDED_FLAGS = 0x0080;
        const AUTO_POSITION = 0x0100;
    }
}

impl Default for InputModes {
    fn default() -> Self {
        InputModes::PROCESSED_INPUT
            | InputModes::LINE_INPUT
            | InputModes::ECHO_INPUT
            | InputModes::MOUSE_INPUT
    }
}

bitflags! {
    /// Mode bits attached to the output side of a session.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct OutputModes: u32 {
        const PROCESSED_OUTPUT = 0x0001;
        const WRAP_AT_EOL_OUTPUT = 0x0002;
    }
}

impl Default for OutputModes {
    fn default() -> Self {
        OutputModes::PROCESSED_OUTPUT | OutputModes::WRAP_AT_EOL_OUTPUT
    }
}

/// How the presentation layer drives the active surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardwareState {
    /// Output goes through the managed drawing path.
    GdiManaged,
    /// The client owns the display hardware directly.
    Direct,
}

impl HardwareState {
    pub fn as_raw(self) -> u32 {
        match self {
            HardwareState::GdiManaged => 0,
            HardwareState::Direct => 1,
        }
    }
}

impl TryFrom<u32> for HardwareState {
    type Error = ConsoleError;

    fn try_from(raw: u32) -> Result<Self, ConsoleError> {
        match raw {
            0 => Ok(HardwareState::GdiManaged),
            1 => Ok(HardwareState::Direct),
            other => Err(ConsoleError::InvalidParameter(format!(
                "hardware state {other} is not recognized"
            ))),
        }
    }
}

/// Code pages a session accepts for its input/output translation.
const VALID_CODE_PAGES: &[u32] = &[
    437, 850, 852, 866, 932, 936, 949, 950, 1250, 1251, 1252, 1253, 1254,
    1255, 1256, 1257, 1258, 65000, 65001,
];

pub fn is_valid_code_page(code_page: u32) -> bool {
    VALID_CODE_PAGES.contains(&code_page)
}
