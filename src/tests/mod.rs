//! Test modules for the PolyX responder
//!
//! Shared fakes live in `fakes`; each remaining module covers the module it
//! is named after.

#[cfg(test)]
pub mod responder_tests;
