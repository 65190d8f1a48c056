//! Port range specifications
//!
//! Access rules and component port sets are written as comma separated lists
//! of single ports or inclusive ranges, e.g. `"80,443,8000-8010"`. Every entry
//! becomes its own security group rule, since a rule request cannot span a
//! non-contiguous list.

use crate::error::{CloudError, Result};
use std::fmt;
use std::str::FromStr;

/// One contiguous span of ports (inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortRangeEntry {
    pub from: u16,
    pub to: u16,
}

impl PortRangeEntry {
    pub fn single(port: u16) -> Self {
        Self {
            from: port,
            to: port,
        }
    }
}

impl fmt::Display for PortRangeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.from == self.to {
            write!(f, "{}", self.from)
        } else {
            write!(f, "{}-{}", self.from, self.to)
        }
    }
}

/// An ordered list of port spans
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortRange {
    entries: Vec<PortRangeEntry>,
}

impl PortRange {
    pub fn parse(spec: &str) -> Result<Self> {
        let invalid = || CloudError::InvalidPortRange(spec.to_string());

        if spec.trim().is_empty() {
            return Err(invalid());
        }

        let mut entries = Vec::new();
        for part in spec.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return Err(invalid());
            }

            let entry = match part.split_once('-') {
                Some((from, to)) => {
                    let from = from.trim().parse::<u16>().map_err(|_| invalid())?;
                    let to = to.trim().parse::<u16>().map_err(|_| invalid())?;
                    if from > to {
                        return Err(invalid());
                    }
                    PortRangeEntry { from, to }
                }
                None => PortRangeEntry::single(part.parse::<u16>().map_err(|_| invalid())?),
            };
            entries.push(entry);
        }

        Ok(Self { entries })
    }

    /// Merge several specs, keeping first-seen order and dropping duplicates
    pub fn union<'a>(specs: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let mut entries: Vec<PortRangeEntry> = Vec::new();
        for spec in specs {
            for entry in Self::parse(spec)?.entries {
                if !entries.contains(&entry) {
                    entries.push(entry);
                }
            }
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[PortRangeEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl FromStr for PortRange {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.entries.iter().map(|e| e.to_string()).collect();
        write!(f, "{}", parts.join(","))
    }
}
