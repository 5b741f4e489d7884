//! Engine test suite: scenario tests over the in-process replication
//! fabric with in-memory devices and metadata stores.

mod helpers;
