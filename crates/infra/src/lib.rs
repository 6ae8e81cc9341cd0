//! OnAir infrastructure: decode threads, ring buffers, resampling and the
//! host audio backend

pub mod audio;
