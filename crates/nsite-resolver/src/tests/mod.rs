//! Tests for the nsite-resolver crate.

mod helpers;
