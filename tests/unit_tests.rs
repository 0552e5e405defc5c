//! Unit test entry point

mod unit;
