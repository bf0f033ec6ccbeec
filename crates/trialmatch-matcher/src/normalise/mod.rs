//! Unit and enum normalisation.
//!
//! Both lookup tables are built once on first use and shared read-only
//! for the life of the process.

pub mod enums;
pub mod units;

pub use enums::{fold, normalise_enum, EnumDomain};
pub use units::{
    canonical_test_type, canonical_unit, convert, normalise, same_unit, unit_catalogue, unit_key, LabUnits,
};
