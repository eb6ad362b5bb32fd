//! Integration tests for the Beacon server.

mod helpers;
mod pipeline_test;
mod realtime_test;
