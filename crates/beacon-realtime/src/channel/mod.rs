//! Channel membership index.

pub mod registry;
pub mod subscription;

pub use registry::ChannelRegistry;
pub use subscription::SubscriptionTracker;
