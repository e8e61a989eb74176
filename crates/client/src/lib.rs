//! Shiftwire realtime client
//!
//! A single resilient WebSocket connection, multiplexed across channel
//! subscribers. Start with [`ws::RealtimeManager`].

pub mod config;
pub mod endpoint;
pub mod logging;
pub mod testing;
pub mod ws;

pub use config::RealtimeConfig;
pub use shiftwire_shared::{ChannelMessage, RealtimeError};
pub use ws::{ConnectionState, RealtimeManager, SubscribeOptions, Subscription};
