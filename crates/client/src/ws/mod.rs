//! Realtime WebSocket layer.
//!
//! One authenticated socket is shared by every channel subscriber in the
//! process:
//!
//! - Lazy connect on the first subscriber, delayed close after the last
//! - In-band `auth` handshake with the JWT also offered as a subprotocol
//! - Exponential backoff reconnect with jitter and a bounded attempt count
//! - Pause while the application is hidden, resume when visible
//! - Controlled reconnect when the access token rotates
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              RealtimeManager (handle)               │
//! │   subscribe / send / connect / disconnect / state   │
//! └─────────────────────────────────────────────────────┘
//!            │ commands                 ▲ state (watch)
//!            ▼                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                  connection task                    │
//! │ socket · timers · outbound queue · reconnect policy │
//! └─────────────────────────────────────────────────────┘
//!      │               ▲                ▲            ▲
//!      ▼               │                │            │
//!  WsTransport   VisibilityMonitor  AuthProvider  SubscriptionRegistry
//!                                                  (channel handlers)
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use shiftwire_client::ws::{RealtimeManager, SessionStore, SubscribeOptions};
//! use shiftwire_client::RealtimeConfig;
//!
//! # async fn example() -> Result<(), shiftwire_client::RealtimeError> {
//! let session = Arc::new(SessionStore::with_token("jwt"));
//! let manager = RealtimeManager::builder(RealtimeConfig::from_env())
//!     .auth_provider(session)
//!     .start()?;
//!
//! let sub = manager.subscribe("shifts", SubscribeOptions::default(), |msg| {
//!     println!("{:?}", msg.payload);
//! });
//! manager.send("shifts", &serde_json::json!({"action": "claim", "id": 7}))?;
//! drop(sub);
//! # Ok(())
//! # }
//! ```

mod connection;
mod events;
mod manager;
mod metrics;
mod outbound;
mod reconnect;
mod registry;
mod timers;
mod token_bridge;
mod visibility;

pub use connection::{
    CloseFrame, ConnectFuture, ConnectRequest, ConnectionState, FrameReader, FrameWriter, Socket,
    TungsteniteTransport, WsFrame, WsTransport,
};
pub use events::{DisconnectReason, EventHandlers};
pub use manager::{RealtimeManager, RealtimeManagerBuilder, Subscription};
pub use metrics::MetricsSnapshot;
pub use reconnect::{
    ReconnectConfig, ReconnectContext, ReconnectDecision, ReconnectScheduler, SkipReason,
    NON_RETRYABLE_CLOSE_CODES,
};
pub use registry::{MessageHandler, SubscribeOptions, SubscriberId};
pub use token_bridge::{AuthEvent, AuthEventKind, AuthProvider, AuthSession, SessionStore};
pub use visibility::{Visibility, VisibilityMonitor};
