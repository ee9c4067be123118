//! Output formatting shared by the `segcompare` binary and its tests.
pub mod output;
