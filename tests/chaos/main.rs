//! Chaos test entry point.

mod slow_io;
