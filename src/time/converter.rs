//! Converters between pairs of time kinds
//!
//! A converter relates an A kind and a B kind and declares which of its four
//! directions may be used. The tree builder only follows a direction the
//! converter explicitly allows.

use serde::{Deserialize, Serialize};

use super::node::{ConversionDirection, TimeKind, TimeTree, SECONDS_PER_DAY};

/// TT - TAI (s)
pub const TT_MINUS_TAI: f64 = 32.184;

/// TAI - GPS (s)
pub const TAI_MINUS_GPS: f64 = 19.0;

/// Directions a converter supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConverterCapabilities {
    pub a_to_b_init: bool,
    pub a_to_b_update: bool,
    pub b_to_a_init: bool,
    pub b_to_a_update: bool,
}

impl ConverterCapabilities {
    pub const ALL: ConverterCapabilities = ConverterCapabilities {
        a_to_b_init: true,
        a_to_b_update: true,
        b_to_a_init: true,
        b_to_a_update: true,
    };

    pub fn allows(&self, direction: ConversionDirection, tree: TimeTree) -> bool {
        match (direction, tree) {
            (ConversionDirection::AToB, TimeTree::Initialization) => self.a_to_b_init,
            (ConversionDirection::AToB, TimeTree::Update) => self.a_to_b_update,
            (ConversionDirection::BToA, TimeTree::Initialization) => self.b_to_a_init,
            (ConversionDirection::BToA, TimeTree::Update) => self.b_to_a_update,
        }
    }
}

/// Relation between two time kinds, values in days
pub trait TimeConverter: Send + Sync {
    fn a_kind(&self) -> TimeKind;

    fn b_kind(&self) -> TimeKind;

    fn capabilities(&self) -> ConverterCapabilities;

    /// Capture any state that depends on the values at startup
    fn initialize(&mut self, _a_days: f64, _b_days: f64) {}

    fn convert_a_to_b(&self, a_days: f64) -> f64;

    fn convert_b_to_a(&self, b_days: f64) -> f64;

    fn name(&self) -> String {
        format!("{}_{}", self.a_kind().name(), self.b_kind().name())
    }

    fn convert(&self, direction: ConversionDirection, days: f64) -> f64 {
        match direction {
            ConversionDirection::AToB => self.convert_a_to_b(days),
            ConversionDirection::BToA => self.convert_b_to_a(days),
        }
    }
}

/// Dynamic time to TAI
///
/// Dyn cannot be computed from TAI until the TAI reading at dynamic time zero
/// is known, so the TAI side only initializes Dyn and Dyn only updates TAI.
#[derive(Debug, Clone, Copy, Default)]
pub struct DynTaiConverter {
    /// TAI truncated Julian time at dynamic time zero
    tai_at_zero: f64,
}

impl DynTaiConverter {
    pub fn tai_at_zero(&self) -> f64 {
        self.tai_at_zero
    }
}

impl TimeConverter for DynTaiConverter {
    fn a_kind(&self) -> TimeKind {
        TimeKind::Dyn
    }

    fn b_kind(&self) -> TimeKind {
        TimeKind::Tai
    }

    fn capabilities(&self) -> ConverterCapabilities {
        ConverterCapabilities {
            a_to_b_update: true,
            b_to_a_init: true,
            ..ConverterCapabilities::default()
        }
    }

    fn initialize(&mut self, a_days: f64, b_days: f64) {
        self.tai_at_zero = b_days - a_days;
    }

    fn convert_a_to_b(&self, a_days: f64) -> f64 {
        self.tai_at_zero + a_days
    }

    fn convert_b_to_a(&self, b_days: f64) -> f64 {
        b_days - self.tai_at_zero
    }
}

/// TAI - UTC from the given UTC truncated Julian time onward
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LeapSecond {
    pub tjt: f64,
    pub seconds: f64,
}

/// TAI to UTC through a leap-second table
#[derive(Debug, Clone, Default)]
pub struct TaiUtcConverter {
    table: Vec<LeapSecond>,
}

impl TaiUtcConverter {
    pub fn new(mut table: Vec<LeapSecond>) -> Self {
        table.sort_by(|a, b| a.tjt.total_cmp(&b.tjt));
        Self { table }
    }

    /// Leap seconds introduced since 1972
    pub fn standard() -> Self {
        const ENTRIES: &[(f64, f64)] = &[
            (1317.0, 10.0),
            (1499.0, 11.0),
            (1683.0, 12.0),
            (2048.0, 13.0),
            (2413.0, 14.0),
            (2778.0, 15.0),
            (3144.0, 16.0),
            (3509.0, 17.0),
            (3874.0, 18.0),
            (4239.0, 19.0),
            (4786.0, 20.0),
            (5151.0, 21.0),
            (5516.0, 22.0),
            (6247.0, 23.0),
            (7161.0, 24.0),
            (7892.0, 25.0),
            (8257.0, 26.0),
            (8804.0, 27.0),
            (9169.0, 28.0),
            (9534.0, 29.0),
            (10083.0, 30.0),
            (10630.0, 31.0),
            (11179.0, 32.0),
            (13736.0, 33.0),
            (14832.0, 34.0),
            (16109.0, 35.0),
            (17204.0, 36.0),
            (17754.0, 37.0),
        ];
        Self::new(
            ENTRIES
                .iter()
                .map(|&(tjt, seconds)| LeapSecond { tjt, seconds })
                .collect(),
        )
    }

    pub fn table(&self) -> &[LeapSecond] {
        &self.table
    }

    /// TAI - UTC (s) at a UTC reading
    pub fn leap_seconds_at_utc(&self, utc_tjt: f64) -> f64 {
        self.table
            .iter()
            .rev()
            .find(|entry| entry.tjt <= utc_tjt)
            .map_or(0.0, |entry| entry.seconds)
    }

    /// TAI - UTC (s) at a TAI reading
    pub fn leap_seconds_at_tai(&self, tai_tjt: f64) -> f64 {
        self.table
            .iter()
            .rev()
            .find(|entry| entry.tjt + entry.seconds / SECONDS_PER_DAY <= tai_tjt)
            .map_or(0.0, |entry| entry.seconds)
    }
}

impl TimeConverter for TaiUtcConverter {
    fn a_kind(&self) -> TimeKind {
        TimeKind::Tai
    }

    fn b_kind(&self) -> TimeKind {
        TimeKind::Utc
    }

    fn capabilities(&self) -> ConverterCapabilities {
        ConverterCapabilities::ALL
    }

    fn convert_a_to_b(&self, a_days: f64) -> f64 {
        a_days - self.leap_seconds_at_tai(a_days) / SECONDS_PER_DAY
    }

    fn convert_b_to_a(&self, b_days: f64) -> f64 {
        b_days + self.leap_seconds_at_utc(b_days) / SECONDS_PER_DAY
    }
}

/// Fixed offset between TAI and another standard
#[derive(Debug, Clone, Copy)]
pub struct TaiOffsetConverter {
    kind: TimeKind,
    /// Other - TAI (s)
    offset: f64,
}

impl TaiOffsetConverter {
    pub fn tt() -> Self {
        Self {
            kind: TimeKind::Tt,
            offset: TT_MINUS_TAI,
        }
    }

    pub fn gps() -> Self {
        Self {
            kind: TimeKind::Gps,
            offset: -TAI_MINUS_GPS,
        }
    }
}

impl TimeConverter for TaiOffsetConverter {
    fn a_kind(&self) -> TimeKind {
        TimeKind::Tai
    }

    fn b_kind(&self) -> TimeKind {
        self.kind
    }

    fn capabilities(&self) -> ConverterCapabilities {
        ConverterCapabilities::ALL
    }

    fn convert_a_to_b(&self, a_days: f64) -> f64 {
        a_days + self.offset / SECONDS_PER_DAY
    }

    fn convert_b_to_a(&self, b_days: f64) -> f64 {
        b_days - self.offset / SECONDS_PER_DAY
    }
}

/// A standard time to time since a user epoch
#[derive(Debug, Clone, Copy)]
pub struct StdUdeConverter {
    standard: TimeKind,
    /// Epoch as a truncated Julian time of `standard`
    epoch_tjt: f64,
}

impl StdUdeConverter {
    pub fn new(standard: TimeKind, epoch_tjt: f64) -> Self {
        Self { standard, epoch_tjt }
    }

    pub fn epoch_tjt(&self) -> f64 {
        self.epoch_tjt
    }
}

impl TimeConverter for StdUdeConverter {
    fn a_kind(&self) -> TimeKind {
        self.standard
    }

    fn b_kind(&self) -> TimeKind {
        TimeKind::Ude
    }

    fn capabilities(&self) -> ConverterCapabilities {
        ConverterCapabilities::ALL
    }

    fn convert_a_to_b(&self, a_days: f64) -> f64 {
        a_days - self.epoch_tjt
    }

    fn convert_b_to_a(&self, b_days: f64) -> f64 {
        b_days + self.epoch_tjt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_leap_table_lookup() {
        let converter = TaiUtcConverter::standard();
        assert_eq!(converter.leap_seconds_at_utc(1000.0), 0.0);
        assert_eq!(converter.leap_seconds_at_utc(1317.0), 10.0);
        assert_eq!(converter.leap_seconds_at_utc(20000.0), 37.0);

        // The leap second takes effect at the UTC boundary, which is later in TAI
        assert_eq!(converter.leap_seconds_at_tai(17754.0), 36.0);
        assert_eq!(converter.leap_seconds_at_tai(17754.0 + 37.0 / SECONDS_PER_DAY), 37.0);
    }

    #[test]
    fn test_utc_round_trip_away_from_boundaries() {
        let converter = TaiUtcConverter::standard();
        let tai = 18000.25;
        let utc = converter.convert_a_to_b(tai);
        assert_relative_eq!((tai - utc) * SECONDS_PER_DAY, 37.0, epsilon = 1e-6);
        assert_relative_eq!(converter.convert_b_to_a(utc), tai, epsilon = 1e-12);
    }

    #[test]
    fn test_dyn_tai_only_updates_forward() {
        let mut converter = DynTaiConverter::default();
        let caps = converter.capabilities();
        assert!(caps.allows(ConversionDirection::AToB, TimeTree::Update));
        assert!(caps.allows(ConversionDirection::BToA, TimeTree::Initialization));
        assert!(!caps.allows(ConversionDirection::AToB, TimeTree::Initialization));
        assert!(!caps.allows(ConversionDirection::BToA, TimeTree::Update));

        converter.initialize(0.0, 1000.0);
        assert_eq!(converter.convert_a_to_b(0.5), 1000.5);
        assert_eq!(converter.name(), "Dyn_TAI");
    }

    #[test]
    fn test_fixed_offsets() {
        let tt = TaiOffsetConverter::tt();
        let gps = TaiOffsetConverter::gps();
        assert_relative_eq!((tt.convert_a_to_b(100.0) - 100.0) * SECONDS_PER_DAY, 32.184, epsilon = 1e-6);
        assert_relative_eq!((100.0 - gps.convert_a_to_b(100.0)) * SECONDS_PER_DAY, 19.0, epsilon = 1e-6);
        assert_eq!(gps.name(), "TAI_GPS");
    }
}
