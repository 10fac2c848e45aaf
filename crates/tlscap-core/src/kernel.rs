//! Host kernel capability detection
//!
//! Picks the eBPF feature tier: kernels at or above [`GLOBAL_VAR_MIN_VERSION`]
//! get the CO-RE programs that use BTF and global variables, older kernels
//! fall back to the non-CO-RE object.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

/// Lowest kernel with BTF / global-variable support for our probes
pub const GLOBAL_VAR_MIN_VERSION: KernelVersion = KernelVersion::new(5, 2, 0);

const OSRELEASE_PATH: &str = "/proc/sys/kernel/osrelease";

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("Failed to read kernel release: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unrecognized kernel release: {0:?}")]
    Parse(String),
}

/// `{major, minor, patch}` kernel version, ordered lexicographically
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KernelVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl KernelVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for KernelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for KernelVersion {
    type Err = KernelError;

    /// Parses releases like `5.15.0-91-generic`, `6.1.0+`, or `4.19`
    fn from_str(release: &str) -> Result<Self, Self::Err> {
        let release = release.trim();
        let parse_err = || KernelError::Parse(release.to_string());

        let mut parts = release.splitn(3, '.');
        let major = leading_number(parts.next().ok_or_else(parse_err)?).ok_or_else(parse_err)?;
        let minor = leading_number(parts.next().ok_or_else(parse_err)?).ok_or_else(parse_err)?;
        let patch = parts.next().and_then(leading_number).unwrap_or(0);

        Ok(Self::new(major, minor, patch))
    }
}

fn leading_number(s: &str) -> Option<u32> {
    let end = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    s[..end].parse().ok()
}

/// What to report when the kernel version cannot be determined
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapabilityPolicy {
    /// Treat an unknown kernel as capable
    #[default]
    FailOpen,
    /// Treat an unknown kernel as incapable
    FailClosed,
}

impl FromStr for CapabilityPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fail-open" | "open" => Ok(Self::FailOpen),
            "fail-closed" | "closed" => Ok(Self::FailClosed),
            other => Err(format!("unknown capability policy: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
enum VersionSource {
    Release(PathBuf),
    Fixed(KernelVersion),
    Unavailable,
}

/// Kernel version probe with a configurable failure policy
#[derive(Debug, Clone)]
pub struct KernelCapabilityProbe {
    source: VersionSource,
    policy: CapabilityPolicy,
}

impl Default for KernelCapabilityProbe {
    fn default() -> Self {
        Self::host()
    }
}

impl KernelCapabilityProbe {
    /// Probe the running kernel
    pub fn host() -> Self {
        Self {
            source: VersionSource::Release(PathBuf::from(OSRELEASE_PATH)),
            policy: CapabilityPolicy::default(),
        }
    }

    /// Probe that always reports `version`
    pub fn fixed(version: KernelVersion) -> Self {
        Self {
            source: VersionSource::Fixed(version),
            policy: CapabilityPolicy::default(),
        }
    }

    /// Probe whose version query always fails
    pub fn unavailable() -> Self {
        Self {
            source: VersionSource::Unavailable,
            policy: CapabilityPolicy::default(),
        }
    }

    /// Read the release string from another file
    pub fn from_release_file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: VersionSource::Release(path.into()),
            policy: CapabilityPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: CapabilityPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> CapabilityPolicy {
        self.policy
    }

    pub fn host_version(&self) -> Result<KernelVersion, KernelError> {
        match &self.source {
            VersionSource::Release(path) => std::fs::read_to_string(path)?.parse(),
            VersionSource::Fixed(version) => Ok(*version),
            VersionSource::Unavailable => Err(KernelError::Parse(String::new())),
        }
    }

    /// Whether the host kernel is at or above `threshold`.
    ///
    /// A failed version query is answered by the configured policy.
    pub fn supports(&self, threshold: KernelVersion) -> bool {
        match self.host_version() {
            Ok(version) => {
                // below the threshold means the feature is unavailable
                let supported = version >= threshold;
                debug!(
                    "kernel {} vs threshold {}: supported={}",
                    version, threshold, supported
                );
                supported
            }
            Err(e) => {
                let supported = self.policy == CapabilityPolicy::FailOpen;
                warn!(
                    "Kernel version unknown ({}), assuming {}",
                    e,
                    if supported { "supported" } else { "unsupported" }
                );
                supported
            }
        }
    }

    pub fn enable_global_var(&self) -> bool {
        self.supports(GLOBAL_VAR_MIN_VERSION)
    }
}
