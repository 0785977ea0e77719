pub mod biquad;

pub use biquad::{Biquad, FilterKind, FilterParams};
