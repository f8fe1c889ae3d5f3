//! Ingestion worker pool
//!
//! Splits the symbol list into fixed-size batches. Each batch fans out one
//! task per symbol under a bounded worker count, gathers every task's bars
//! and commits them with a single upsert before the next batch starts.

mod ingest;

pub use ingest::*;

#[cfg(test)]
mod ingest_tests;
