//! Domain layer: admission control, caller identity, and lifecycle events.
//!
//! This module holds the transport-independent pieces every inbound call
//! passes through: the credit-based [`RateLimiter`], the [`CorsPolicy`],
//! caller context resolution (address and session), and the event bus
//! that carries connection lifecycle events to observers.

pub mod client_ip;
pub mod clock;
pub mod context;
pub mod cors;
pub mod event_bus;
pub mod lifecycle_event;
pub mod rate_limiter;
pub mod session;

pub use client_ip::ClientIpResolver;
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{CallContext, ContextFactory, GUEST};
pub use cors::{CorsDecision, CorsPolicy};
pub use event_bus::EventBus;
pub use lifecycle_event::{LifecycleEvent, LifecycleKind};
pub use rate_limiter::{AddressInfo, Credit, RateEntry, RateLimiter};
pub use session::{MemorySession, MemorySessionStore, SessionContext, SessionProvider};
