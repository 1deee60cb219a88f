//! Time-system graph
//!
//! Each time kind is a node; converters are the edges between pairs of
//! kinds. [`TimeManager::initialize`] builds two trees over this graph with
//! the same auto-seek builder:
//!
//! - **initialization tree**, rooted at the designated initializer, walked
//!   once to seed every time
//! - **update tree**, rooted at Dyn, walked after every step
//!
//! A converter is followed only in the directions it declares for the tree
//! being built.

mod converter;
mod manager;
mod node;

pub use converter::{
    ConverterCapabilities, DynTaiConverter, LeapSecond, StdUdeConverter, TaiOffsetConverter,
    TaiUtcConverter, TimeConverter, TAI_MINUS_GPS, TT_MINUS_TAI,
};
pub use manager::TimeManager;
pub use node::{
    ConversionDirection, TimeKind, TimeNode, TimeTree, TreeLinks, SECONDS_PER_DAY, TJT_JD_OFFSET,
};
