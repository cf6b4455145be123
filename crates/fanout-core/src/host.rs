//! Host descriptors and fleet files.
//!
//! A fleet file lists one host per line as `user@host[:port]`. Blank lines
//! and lines whose first non-whitespace character is `#` are skipped by
//! [`Fleet::parse`] before a line ever reaches [`HostDescriptor::parse`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

/// Port used when a fleet line does not name one.
pub const DEFAULT_SSH_PORT: &str = "22";

/// A fleet line that does not have the `user@host[:port]` shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid host format: {line:?} (expected user@host[:port])")]
pub struct MalformedHostLine {
    pub line: String,
}

/// Errors raised while loading a fleet file. Both are fatal for a run.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("failed to read hosts file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("hosts file line {line_number}: {source}")]
    Malformed {
        line_number: usize,
        #[source]
        source: MalformedHostLine,
    },
}

/// One SSH target, derived once from a fleet line.
///
/// `address` is always `user@host`; the port is carried separately and
/// never appears in the address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDescriptor {
    address: String,
    username: String,
    host: String,
    port: String,
}

impl HostDescriptor {
    /// Parse a single `user@host[:port]` line.
    ///
    /// The line must contain exactly one `@` with a non-empty user on its
    /// left and a non-empty host on its right. A single `:` in the host
    /// part splits off the port; without one the port is `"22"`. More than
    /// one `:` is malformed.
    pub fn parse(line: &str) -> Result<Self, MalformedHostLine> {
        let malformed = || MalformedHostLine {
            line: line.to_owned(),
        };

        let mut parts = line.split('@');
        let (Some(user), Some(host_part), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(malformed());
        };

        let mut segments = host_part.split(':');
        let (host, port) = match (segments.next(), segments.next(), segments.next()) {
            (Some(host), None, None) => (host, DEFAULT_SSH_PORT),
            (Some(host), Some(port), None) => (host, port),
            _ => return Err(malformed()),
        };

        if user.is_empty() || host.is_empty() || port.is_empty() {
            return Err(malformed());
        }

        Ok(Self {
            address: format!("{user}@{host}"),
            username: user.to_owned(),
            host: host.to_owned(),
            port: port.to_owned(),
        })
    }

    /// `user@host`, used as the host label in every frame.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// The host part of the address, without user or port.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> &str {
        &self.port
    }
}

impl FromStr for HostDescriptor {
    type Err = MalformedHostLine;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for HostDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// The ordered, read-only set of hosts for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fleet {
    hosts: Vec<HostDescriptor>,
}

impl Fleet {
    /// Parse fleet file contents.
    ///
    /// Lines are trimmed; blank and `#` comment lines are skipped. The first
    /// malformed line aborts parsing with its 1-based line number.
    pub fn parse(contents: &str) -> Result<Self, FleetError> {
        let mut hosts = Vec::new();
        for (idx, raw) in contents.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let descriptor = HostDescriptor::parse(line).map_err(|source| FleetError::Malformed {
                line_number: idx + 1,
                source,
            })?;
            hosts.push(descriptor);
        }
        Ok(Self { hosts })
    }

    /// Read and parse a fleet file from disk.
    pub fn load(path: &Path) -> Result<Self, FleetError> {
        let contents = std::fs::read_to_string(path).map_err(|source| FleetError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents)
    }

    pub fn hosts(&self) -> &[HostDescriptor] {
        &self.hosts
    }

    pub fn iter(&self) -> std::slice::Iter<'_, HostDescriptor> {
        self.hosts.iter()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

impl<'a> IntoIterator for &'a Fleet {
    type Item = &'a HostDescriptor;
    type IntoIter = std::slice::Iter<'a, HostDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.hosts.iter()
    }
}
