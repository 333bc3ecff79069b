//! Crate-level behaviour tests and shared fixtures.

pub(crate) mod support;
