//! Decoded capture events
//!
//! Backends decode raw kernel records into types implementing
//! [`CaptureEvent`]. Rendering is a pure projection of the decoded fields:
//! it never touches payload bytes beyond the declared valid length.

mod hexdump;
mod wire;

pub use hexdump::hex_dump;
pub use wire::{WireReader, MAX_TRAILING_PADDING};

use crate::filter::CommFilter;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Thread name width (TASK_COMM_LEN)
pub const COMM_LEN: usize = 16;

pub const COLOR_RESET: &str = "\x1b[0m";
pub const COLOR_RED: &str = "\x1b[31m";
pub const COLOR_GREEN: &str = "\x1b[32m";
pub const COLOR_BLUE: &str = "\x1b[34m";
pub const COLOR_PURPLE: &str = "\x1b[35m";

/// Record decode errors. The record is dropped; the capture loop continues.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Short read: need {needed} bytes, have {available}")]
    ShortRead { needed: usize, available: usize },

    #[error("Declared length {len} outside buffer capacity {capacity}")]
    LengthOutOfBounds { len: i64, capacity: usize },

    #[error("{extra} unexpected trailing bytes after record")]
    TrailingBytes { extra: usize },
}

/// Check a declared payload length against the buffer it describes
pub fn bounded_len(len: i32, capacity: usize) -> Result<usize, DecodeError> {
    usize::try_from(len)
        .ok()
        .filter(|&l| l <= capacity)
        .ok_or(DecodeError::LengthOutOfBounds {
            len: len as i64,
            capacity,
        })
}

/// Fixed-width, nul-padded thread name as recorded by the kernel.
///
/// Not guaranteed to be nul terminated; use [`Comm::display`] for text.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Comm([u8; COMM_LEN]);

impl Comm {
    pub fn from_bytes(bytes: [u8; COMM_LEN]) -> Self {
        Self(bytes)
    }

    /// Build from a name, truncating at the declared width
    pub fn new(name: &str) -> Self {
        let mut bytes = [0u8; COMM_LEN];
        let src = name.as_bytes();
        let len = src.len().min(COMM_LEN);
        bytes[..len].copy_from_slice(&src[..len]);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; COMM_LEN] {
        &self.0
    }

    /// Text up to the first nul, lossily decoded, surrounding whitespace trimmed
    pub fn display(&self) -> String {
        let end = self.0.iter().position(|&c| c == 0).unwrap_or(COMM_LEN);
        String::from_utf8_lossy(&self.0[..end]).trim().to_string()
    }
}

impl fmt::Display for Comm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

impl fmt::Debug for Comm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Comm({:?})", self.display())
    }
}

/// Direction of a record, from the probe attach type that produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Captured at probe entry: data the process is receiving
    Received,
    /// Captured at probe return: data the process sent
    Sent,
    /// Unrecognized attach type
    Unknown(i64),
}

impl Direction {
    pub const PROBE_ENTRY: i64 = 0;
    pub const PROBE_RET: i64 = 1;

    pub fn from_attach_type(value: i64) -> Self {
        match value {
            Self::PROBE_ENTRY => Self::Received,
            Self::PROBE_RET => Self::Sent,
            other => Self::Unknown(other),
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Received => "Received".to_string(),
            Self::Sent => "Send".to_string(),
            Self::Unknown(v) => format!("UNKNOWN_{}", v),
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            Self::Received => COLOR_GREEN,
            Self::Sent => COLOR_PURPLE,
            Self::Unknown(_) => COLOR_RED,
        }
    }
}

/// Caller-controlled rendering settings
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// Thread-name predicate; non-matching payloads render as `[ignore]`
    pub filter: CommFilter,
    /// Emit ANSI colors
    pub color: bool,
}

impl RenderOptions {
    pub fn paint(&self, color: &str, text: &str) -> String {
        if self.color {
            format!("{}{}{}", color, text, COLOR_RESET)
        } else {
            text.to_string()
        }
    }
}

/// Serializable projection of an event, used by structured sinks
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub module: &'static str,
    pub timestamp_ns: u64,
    pub pid: u32,
    pub tid: u32,
    pub comm: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    pub len: usize,
    pub ignored: bool,
    pub payload: String,
    pub payload_hex: String,
}

/// A decoded record from one backend
pub trait CaptureEvent: Send + fmt::Debug {
    /// Name of the module that decoded this event
    fn module(&self) -> &'static str;

    fn timestamp_ns(&self) -> u64;

    fn pid(&self) -> u32;

    fn tid(&self) -> u32;

    fn comm(&self) -> &Comm;

    /// Direction, for layouts that carry an attach-type discriminant
    fn direction(&self) -> Option<Direction> {
        None
    }

    /// The valid part of the payload (bounded by the declared length)
    fn payload(&self) -> &[u8];

    /// Payload as text
    fn render(&self, opts: &RenderOptions) -> String;

    /// Payload as a hex dump
    fn render_hex(&self, opts: &RenderOptions) -> String;

    fn to_record(&self, opts: &RenderOptions) -> EventRecord {
        let ignored = !opts.filter.matches(self.comm());
        let payload = if ignored { &[][..] } else { self.payload() };
        EventRecord {
            module: self.module(),
            timestamp_ns: self.timestamp_ns(),
            pid: self.pid(),
            tid: self.tid(),
            comm: self.comm().display(),
            direction: self.direction(),
            len: self.payload().len(),
            ignored,
            payload: String::from_utf8_lossy(payload).to_string(),
            payload_hex: hex::encode(payload),
        }
    }
}

/// Minimal event for sink and record tests
#[cfg(test)]
pub(crate) mod stub {
    use super::*;

    #[derive(Debug)]
    pub(crate) struct StubEvent {
        pub comm: Comm,
        pub payload: Vec<u8>,
    }

    impl StubEvent {
        pub(crate) fn new(comm: &str, payload: &[u8]) -> Self {
            Self {
                comm: Comm::new(comm),
                payload: payload.to_vec(),
            }
        }
    }

    impl CaptureEvent for StubEvent {
        fn module(&self) -> &'static str {
            "stub"
        }

        fn timestamp_ns(&self) -> u64 {
            42
        }

        fn pid(&self) -> u32 {
            7
        }

        fn tid(&self) -> u32 {
            8
        }

        fn comm(&self) -> &Comm {
            &self.comm
        }

        fn direction(&self) -> Option<Direction> {
            Some(Direction::Received)
        }

        fn payload(&self) -> &[u8] {
            &self.payload
        }

        fn render(&self, opts: &RenderOptions) -> String {
            if opts.filter.matches(&self.comm) {
                format!("Comm:{}, Payload:{}", self.comm, String::from_utf8_lossy(&self.payload))
            } else {
                format!("Comm:{}, Payload:[ignore]", self.comm)
            }
        }

        fn render_hex(&self, _opts: &RenderOptions) -> String {
            hex_dump(&self.payload, "")
        }
    }
}
