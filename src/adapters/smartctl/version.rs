use std::fmt;

use regex::Regex;
use serde::Serialize;

use crate::error::QueryError;

/// Oldest release with `-j` JSON output.
pub const MIN_SUPPORTED: (u32, u32) = (7, 0);

/// Version line from `smartctl -V`, e.g.
/// `smartctl 7.1 2019-12-30 r5022 [x86_64-linux-5.4.0-40-generic] (local build)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SmartctlVersion {
    pub major: u32,
    pub minor: u32,
    pub build_date: Option<String>,
    pub revision: Option<String>,
    pub platform: Option<String>,
}

impl SmartctlVersion {
    pub fn parse(output: &str) -> Result<Self, QueryError> {
        let re = Regex::new(
            r"(?m)^smartctl (\d+)\.(\d+)(?:[ \t]+(\d{4}-\d{2}-\d{2}))?(?:[ \t]+(r\d+))?(?:[ \t]+\[([^\]]+)\])?",
        )
        .map_err(|e| QueryError::Parse(e.to_string()))?;

        let caps = re.captures(output).ok_or_else(|| {
            QueryError::Parse("no 'smartctl <major>.<minor>' line in version output".to_string())
        })?;

        let number = |i: usize| -> Result<u32, QueryError> {
            caps[i]
                .parse()
                .map_err(|e| QueryError::Parse(format!("bad version number {:?}: {e}", &caps[i])))
        };
        let text = |i: usize| caps.get(i).map(|m| m.as_str().to_string());

        Ok(Self {
            major: number(1)?,
            minor: number(2)?,
            build_date: text(3),
            revision: text(4),
            platform: text(5),
        })
    }

    pub fn is_supported(&self) -> bool {
        (self.major, self.minor) >= MIN_SUPPORTED
    }

    pub fn ensure_supported(self) -> Result<Self, QueryError> {
        if self.is_supported() {
            Ok(self)
        } else {
            Err(QueryError::UnsupportedVersion {
                major: self.major,
                minor: self.minor,
            })
        }
    }
}

impl fmt::Display for SmartctlVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}
