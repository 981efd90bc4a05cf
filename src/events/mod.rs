//! Contract event streaming.
//!
//! # Data Flow
//! ```text
//! ProviderPool ─ logs (cursor, safe head] ─▶ subscriber.rs (state machine, ordering, dedup)
//!                                                │
//!                                                ├─▶ handler.rs (EventHandler / bounded channel)
//!                                                └─▶ cursor.rs  (CursorStore: memory or JSON file)
//! ```

pub mod cursor;
pub mod handler;
pub mod subscriber;
pub mod types;

pub use cursor::{CursorKey, CursorStore, EventCursor, FileCursorStore, MemoryCursorStore};
pub use handler::{ChannelHandler, EventHandler, HandlerError};
pub use subscriber::{ActiveSubscriptions, EventSubscriber, SubscriptionHandle, SubscriptionOptions};
pub use types::{EventKey, LedgerEvent, SubscriberState};
