//! A MapReduce engine bounded to one process: a coordinator leases map and
//! reduce tasks to a pool of concurrent workers, reclaims expired leases,
//! and a staging store publishes every task output through an atomic rename
//! so that a crashed or stalled worker never corrupts observable state.

pub mod mr;
