use std::fmt;
use std::str::FromStr;

use tracing::level_filters::LevelFilter;

use crate::error::Error;

/// Severity level as seen by the framework side of the adapter.
///
/// The set is open on purpose: callers can hand over any byte, and values
/// outside the named constants are "unmapped" (see [`Lvl::to_filter`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Lvl(pub u8);

impl Lvl {
    pub const DEBUG: Lvl = Lvl(1);
    pub const INFO: Lvl = Lvl(2);
    pub const WARN: Lvl = Lvl(3);
    pub const ERROR: Lvl = Lvl(4);
    pub const OFF: Lvl = Lvl(5);

    /// Translates to the tracing filter, falling back to
    /// [`LevelFilter::TRACE`] for unmapped values.
    pub fn to_filter(self) -> LevelFilter {
        LevelFilter::try_from(self).unwrap_or(LevelFilter::TRACE)
    }

    /// Translates a tracing filter back, falling back to [`Lvl::OFF`] for
    /// filters with no framework counterpart (TRACE).
    pub fn from_filter(filter: LevelFilter) -> Lvl {
        LEVEL_TABLE
            .iter()
            .find(|(_, f)| *f == filter)
            .map(|(lvl, _)| *lvl)
            .unwrap_or(Lvl::OFF)
    }

    pub fn is_mapped(self) -> bool {
        LEVEL_TABLE.iter().any(|(lvl, _)| *lvl == self)
    }

    fn name(self) -> Option<&'static str> {
        match self {
            Lvl::DEBUG => Some("debug"),
            Lvl::INFO => Some("info"),
            Lvl::WARN => Some("warn"),
            Lvl::ERROR => Some("error"),
            Lvl::OFF => Some("off"),
            _ => None,
        }
    }
}

// Fallback entries live in `to_filter`/`from_filter`, not here.
const LEVEL_TABLE: [(Lvl, LevelFilter); 5] = [
    (Lvl::DEBUG, LevelFilter::DEBUG),
    (Lvl::INFO, LevelFilter::INFO),
    (Lvl::WARN, LevelFilter::WARN),
    (Lvl::ERROR, LevelFilter::ERROR),
    (Lvl::OFF, LevelFilter::OFF),
];

impl TryFrom<Lvl> for LevelFilter {
    type Error = Error;

    fn try_from(lvl: Lvl) -> Result<Self, Self::Error> {
        LEVEL_TABLE
            .iter()
            .find(|(l, _)| *l == lvl)
            .map(|(_, filter)| *filter)
            .ok_or(Error::UnknownLevel(lvl))
    }
}

impl fmt::Display for Lvl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "lvl({})", self.0),
        }
    }
}

impl FromStr for Lvl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(Lvl::DEBUG),
            "info" => Ok(Lvl::INFO),
            "warn" | "warning" => Ok(Lvl::WARN),
            "error" => Ok(Lvl::ERROR),
            "off" => Ok(Lvl::OFF),
            _ => Err(Error::InvalidLevelName(s.to_string())),
        }
    }
}
