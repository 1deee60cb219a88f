//! Time representations and their tree links

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{DynError, Result};

pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Julian date of truncated Julian time zero
pub const TJT_JD_OFFSET: f64 = 2_440_000.5;

/// Truncated Julian time of 1970-01-01T00:00:00
const TJT_UNIX_EPOCH: f64 = 587.0;

const CALENDAR_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"];

/// Kinds of time the manager knows how to relate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeKind {
    /// Elapsed dynamic time since the start of the run
    Dyn,
    Tai,
    Utc,
    /// User-defined epoch
    Ude,
    Tt,
    Gps,
}

impl TimeKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Dyn => "Dyn",
            Self::Tai => "TAI",
            Self::Utc => "UTC",
            Self::Ude => "UDE",
            Self::Tt => "TT",
            Self::Gps => "GPS",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Dyn => "Elapsed simulation dynamic time",
            Self::Tai => "International Atomic Time",
            Self::Utc => "Coordinated Universal Time",
            Self::Ude => "Time since a user-defined epoch",
            Self::Tt => "Terrestrial Time",
            Self::Gps => "GPS system time",
        }
    }

    pub fn all() -> &'static [TimeKind] {
        &[Self::Dyn, Self::Tai, Self::Utc, Self::Ude, Self::Tt, Self::Gps]
    }

    /// Kinds whose value is an absolute truncated Julian time
    pub fn is_standard(&self) -> bool {
        matches!(self, Self::Tai | Self::Utc | Self::Tt | Self::Gps)
    }
}

/// Which side of a converter is computed from the other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversionDirection {
    AToB,
    BToA,
}

/// The two trees every time node is placed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeTree {
    /// Rooted at the designated initializer; walked once at startup
    Initialization,
    /// Rooted at dynamic time; walked every update
    Update,
}

impl TimeTree {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialization => "initialization",
            Self::Update => "update",
        }
    }
}

/// Placement of a node in one time tree
#[derive(Debug, Clone, Default)]
pub struct TreeLinks {
    /// Parent requested in configuration; found by auto-seek when absent
    pub user_parent: Option<TimeKind>,
    pub(crate) parent: Option<usize>,
    pub(crate) converter: Option<(usize, ConversionDirection)>,
    pub(crate) generation: Option<u32>,
    pub(crate) children: Vec<usize>,
}

impl TreeLinks {
    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    /// Converter index and direction that compute this node from its parent
    pub fn converter(&self) -> Option<(usize, ConversionDirection)> {
        self.converter
    }

    /// Distance from the tree root, once placed
    pub fn generation(&self) -> Option<u32> {
        self.generation
    }

    pub fn children(&self) -> &[usize] {
        &self.children
    }

    pub fn is_placed(&self) -> bool {
        self.generation.is_some()
    }

    pub(crate) fn clear(&mut self) {
        self.parent = None;
        self.converter = None;
        self.generation = None;
        self.children.clear();
    }
}

/// One time representation
///
/// Standard kinds hold truncated Julian time in `days`. Dyn and UDE hold time
/// elapsed since their own epoch.
#[derive(Debug, Clone)]
pub struct TimeNode {
    pub kind: TimeKind,
    pub name: String,
    pub init_links: TreeLinks,
    pub update_links: TreeLinks,
    seconds: f64,
    days: f64,
    pub(crate) index: usize,
    initialized: bool,
}

impl TimeNode {
    pub fn new(kind: TimeKind) -> Self {
        Self {
            kind,
            name: kind.name().to_string(),
            init_links: TreeLinks::default(),
            update_links: TreeLinks::default(),
            seconds: 0.0,
            days: 0.0,
            index: 0,
            initialized: false,
        }
    }

    /// Node whose update-tree parent is fixed instead of auto-sought
    pub fn with_update_parent(kind: TimeKind, parent: TimeKind) -> Self {
        let mut node = Self::new(kind);
        node.update_links.user_parent = Some(parent);
        node
    }

    pub fn seconds(&self) -> f64 {
        self.seconds
    }

    pub fn days(&self) -> f64 {
        self.days
    }

    /// Position in the manager's registry
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn set_days(&mut self, days: f64) {
        self.days = days;
        self.seconds = days * SECONDS_PER_DAY;
        self.initialized = true;
    }

    pub fn set_seconds(&mut self, seconds: f64) {
        self.seconds = seconds;
        self.days = seconds / SECONDS_PER_DAY;
        self.initialized = true;
    }

    pub fn links(&self, tree: TimeTree) -> &TreeLinks {
        match tree {
            TimeTree::Initialization => &self.init_links,
            TimeTree::Update => &self.update_links,
        }
    }

    pub(crate) fn links_mut(&mut self, tree: TimeTree) -> &mut TreeLinks {
        match tree {
            TimeTree::Initialization => &mut self.init_links,
            TimeTree::Update => &mut self.update_links,
        }
    }

    pub fn trunc_julian_time(&self) -> Option<f64> {
        self.kind.is_standard().then_some(self.days)
    }

    pub fn julian_date(&self) -> Option<f64> {
        self.trunc_julian_time().map(|tjt| tjt + TJT_JD_OFFSET)
    }

    /// Calendar reading of a standard time (no leap-second smearing)
    pub fn calendar(&self) -> Option<NaiveDateTime> {
        let tjt = self.trunc_julian_time()?;
        // Microsecond resolution keeps day-scale rounding out of the seconds field
        let micros = ((tjt - TJT_UNIX_EPOCH) * SECONDS_PER_DAY * 1e6).round() as i64;
        let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
        DateTime::from_timestamp(micros.div_euclid(1_000_000), nanos).map(|dt| dt.naive_utc())
    }

    /// Set a standard time from a calendar string such as
    /// `2020-01-01T12:00:00.5`
    pub fn set_calendar(&mut self, text: &str) -> Result<()> {
        if !self.kind.is_standard() {
            return Err(DynError::Config {
                message: format!("{} has no calendar representation", self.name),
            });
        }
        let parsed = CALENDAR_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
            .ok_or_else(|| DynError::Config {
                message: format!("cannot parse '{}' as a calendar time", text),
            })?;
        let utc = parsed.and_utc();
        let seconds = utc.timestamp() as f64 + f64::from(utc.timestamp_subsec_nanos()) * 1e-9;
        self.set_days(TJT_UNIX_EPOCH + seconds / SECONDS_PER_DAY);
        Ok(())
    }
}
