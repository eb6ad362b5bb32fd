//! Axum middleware stack.
//!
//! Each module provides one [`Stage`](crate::pipeline::Stage) of the
//! request pipeline.

pub mod body;
pub mod compression;
pub mod cors;
pub mod hardening;
pub mod logging;
pub mod proxy;
pub mod session;
