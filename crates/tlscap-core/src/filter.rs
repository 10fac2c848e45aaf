//! Thread-name filtering for rendered events

use crate::events::Comm;

/// Predicate over an event's thread name.
///
/// Records that do not match are still emitted, with the payload replaced by
/// an `[ignore]` marker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CommFilter {
    /// Every thread passes
    #[default]
    PassAll,
    /// Only this exact (trimmed) thread name passes
    Exact(String),
    /// Only thread names starting with this prefix pass
    Prefix(String),
}

impl CommFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a setting string: empty = pass all, trailing `*` = prefix.
    pub fn from_setting(setting: &str) -> Self {
        let setting = setting.trim();
        if setting.is_empty() {
            Self::PassAll
        } else if let Some(prefix) = setting.strip_suffix('*') {
            Self::Prefix(prefix.to_string())
        } else {
            Self::Exact(setting.to_string())
        }
    }

    /// Whether a record from this thread should have its payload rendered
    pub fn matches(&self, comm: &Comm) -> bool {
        match self {
            Self::PassAll => true,
            Self::Exact(name) => comm.display() == *name,
            Self::Prefix(prefix) => comm.display().starts_with(prefix.as_str()),
        }
    }

    pub fn is_pass_all(&self) -> bool {
        matches!(self, Self::PassAll)
    }
}
