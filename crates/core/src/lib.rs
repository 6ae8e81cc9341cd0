//! OnAir core: the realtime mixing domain
//!
//! Everything in here is free of threads and I/O apart from the
//! configuration layer. The `infra` crate supplies decoders, ring buffers
//! and the host audio backend.

pub mod domain;
