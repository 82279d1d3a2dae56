//! Relay transport for the weir engine.
//!
//! Two layers:
//! - [`RelayConnection`] — one persistent WebSocket to one relay, with the
//!   connection state machine, subscription table, and
//!   resubscribe-on-reconnect.
//! - [`RelayPool`] — N connections behind one interface: broadcast
//!   subscribe, merged event and status streams, per-relay failure
//!   isolation.

pub mod error;
pub mod pool;
pub mod relay;

pub use error::{ClientError, Result};
pub use pool::{PoolConfig, PoolSubscription, RelayPool};
pub use relay::{RelayConfig, RelayConnection, RelayStatus, SubscriptionStream};
