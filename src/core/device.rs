use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DeviceError;

/// Characters that never appear in a device node and would be dangerous if
/// the path ever reached a shell.
const FORBIDDEN: &[char] = &[
    ';', '|', '&', '$', '<', '>', '`', '\'', '"', '*', '?', '(', ')', '{', '}', '\\', '!', '#',
    '~',
];

/// A sanitized, normalized path to a block device under `/dev`.
///
/// Accepts `/dev/sda`, `dev/sda` and bare `sda`; all three resolve to
/// `/dev/sda`. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DevicePath(String);

impl DevicePath {
    pub fn parse(raw: &str) -> Result<Self, DeviceError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DeviceError::Empty);
        }

        if let Some(ch) = trimmed
            .chars()
            .find(|c| c.is_whitespace() || c.is_control() || FORBIDDEN.contains(c))
        {
            return Err(DeviceError::ForbiddenCharacter {
                path: trimmed.to_string(),
                ch,
            });
        }

        let absolute = trimmed.starts_with('/');
        let mut segments: Vec<&str> = Vec::new();
        for segment in trimmed.split('/') {
            match segment {
                "" | "." => continue,
                ".." => return Err(DeviceError::ParentComponent(trimmed.to_string())),
                s => segments.push(s),
            }
        }

        match segments.first() {
            Some(&"dev") => {}
            Some(_) if !absolute => segments.insert(0, "dev"),
            _ => return Err(DeviceError::OutsideDev(trimmed.to_string())),
        }

        // "/dev" on its own names the directory, not a device
        if segments.len() < 2 {
            return Err(DeviceError::OutsideDev(trimmed.to_string()));
        }

        Ok(Self(format!("/{}", segments.join("/"))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path component, e.g. `sda` for `/dev/sda`.
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for DevicePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DevicePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl AsRef<std::ffi::OsStr> for DevicePath {
    fn as_ref(&self) -> &std::ffi::OsStr {
        self.0.as_ref()
    }
}

impl FromStr for DevicePath {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DevicePath {
    type Error = DeviceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DevicePath> for String {
    fn from(path: DevicePath) -> Self {
        path.0
    }
}
