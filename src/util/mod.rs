//! Small, dependency-free helpers shared by the rest of the crate.

pub mod bits;
pub mod codec;

pub use bits::Bits;
