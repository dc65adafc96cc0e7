//! Application identity parsing.
//!
//! The scheduler names every application container
//! `<app>_v<version>.<cmd|web>.<instance>`. Any other container on the
//! host (databases, sidecars, the platform's own components) does not
//! match and is simply not an application container.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use tracing::error;

/// Canonical container name. Numeric fields reject leading zeros so that
/// `v2` and `v02` can never both describe the same release.
static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-z0-9-]+)_v([1-9][0-9]*)\.(cmd|web)\.([1-9][0-9]*)$")
        .expect("container name pattern compiles")
});

/// Process type of an application container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProcessType {
    Cmd,
    Web,
}

impl ProcessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessType::Cmd => "cmd",
            ProcessType::Web => "web",
        }
    }
}

impl fmt::Display for ProcessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cmd" => Ok(ProcessType::Cmd),
            "web" => Ok(ProcessType::Web),
            other => Err(format!("unknown process type: {other}")),
        }
    }
}

/// Structured identity of an application container, derived from its name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ApplicationIdentity {
    pub app_name: String,
    /// Release ordinal, starting at 1.
    pub version: u64,
    pub process_type: ProcessType,
    /// Instance ordinal within the process type, starting at 1.
    pub instance: u64,
}

impl ApplicationIdentity {
    /// Parse a container name (without the runtime's leading `/`).
    ///
    /// Returns `None` for anything that is not a canonical application
    /// container name. Numeric fields too large for `u64` are logged and
    /// rejected rather than wrapped or clamped.
    pub fn parse(name: &str) -> Option<Self> {
        let caps = NAME_PATTERN.captures(name)?;

        let version = match caps[2].parse::<u64>() {
            Ok(v) => v,
            Err(e) => {
                error!(%name, error = %e, "container version out of range");
                return None;
            }
        };
        let instance = match caps[4].parse::<u64>() {
            Ok(i) => i,
            Err(e) => {
                error!(%name, error = %e, "container instance ordinal out of range");
                return None;
            }
        };
        let process_type = caps[3].parse::<ProcessType>().ok()?;

        Some(Self {
            app_name: caps[1].to_string(),
            version,
            process_type,
            instance,
        })
    }

    /// Parse the final segment of a store key such as
    /// `/deis/services/myapp/myapp_v2.web.1`.
    pub fn from_key(key: &str) -> Option<Self> {
        let name = key.rsplit('/').next()?;
        Self::parse(name)
    }

    /// The canonical container name this identity was parsed from.
    pub fn container_name(&self) -> String {
        format!(
            "{}_v{}.{}.{}",
            self.app_name, self.version, self.process_type, self.instance
        )
    }
}
