//! Streaming inspection filter.
//!
//! ```text
//! decode_headers ─► Host Resolver ─► TransactionScope::open
//!       │                                   │
//!       ▼                                   ▼
//! decode_data ──► request body phase    (one transaction per stream)
//! encode_headers ► [forced request body] ► response headers phase
//! encode_data ──► response body phase ─► ReplyBridge (400 / 403 / suppress)
//! on_destroy ───► detection-only response body, logging, close
//! ```

pub mod address;
pub mod factory;
pub mod host;
pub mod lifecycle;
pub mod memory;
pub mod phase;
pub mod reply;
pub mod session;

pub use factory::FilterFactory;
pub use host::{
    BufferInstance, DestroyReason, FilterCallbacks, FilterStatus, HeaderMap, LocalReply,
    RequestHeaderMap,
};
pub use phase::Phase;
pub use reply::{Latch, FILLER_BYTE};
pub use session::{WafFilter, DEFAULT_PROTOCOL};
