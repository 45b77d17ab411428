//! Log ingestion: incremental readers, the per-source processor pipeline,
//! the coordinator managing their lifecycle, and startup source discovery.

pub mod coordinator;
pub mod discovery;
pub mod processor;
pub mod reader;
