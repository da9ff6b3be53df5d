pub mod generators;

pub use generators::{random_header, random_header_range, rng};
