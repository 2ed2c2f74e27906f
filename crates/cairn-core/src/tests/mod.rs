//! Tests for the cairn-core crate.

mod helpers;

mod concurrency;
