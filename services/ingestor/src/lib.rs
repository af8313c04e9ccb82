//! clusterboard ingestor library.
//!
//! This crate primarily ships an `ingestor` binary, but we expose a small
//! library surface to enable integration testing and reuse.

pub mod config;
pub mod db;
pub mod source;
pub mod worker;
