//! Operator HTTP API: run-now, pipeline health, dead-letter inspection and replay.

pub mod app;
