//! Built-in request handlers.

pub mod fallback;
pub mod ws;
