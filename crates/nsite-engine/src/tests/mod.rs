//! Tests for the nsite-engine crate.

mod helpers;
