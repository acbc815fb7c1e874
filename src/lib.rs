//! # Market-data fan-out over an SPMC broadcast ring
//!
//! An ultra-low-latency **single-producer / multi-consumer** broadcast
//! primitive for market-data distribution: one writer injects fixed-size
//! records, any number of readers observe the stream independently, and a
//! typed hub fans a tagged record variant out to subscriber callbacks on
//! dedicated consumer threads.
//!
//! # Features
//!
//! * **Lock-free** SPMC broadcast ring with a wait-free writer
//! * **Per-slot sequence numbers** publish records and detect overruns
//! * **Slow readers lose data**: the writer never blocks or waits
//! * **Cache-friendly** layout (`CachePadded` slots and cursor)
//! * **Typed fan-out**: per-subscriber tag filter, callback and thread
//! * Zero allocations on the publish and read paths
//!
//! # Overrun behaviour
//!
//! The ring holds the most recent `N` records. A reader that falls more
//! than one revolution behind is lapped: its next read skips ahead to the
//! oldest record still present and the gap is reported via
//! [`Reader::lagged`]. Readers that keep up observe every record in
//! producer order. There is no backpressure and no flow control, by
//! design; size the ring for the burst you need to absorb.
//!
//! # Idle behaviour
//!
//! Hub consumer threads nap for about a microsecond when the ring is
//! empty, so idle subscribers do not pin cores. Embedders that want the
//! lowest possible latency can poll a raw [`Reader`] in a busy loop
//! instead and burn the core deliberately.
//!
//! # Quick example
//!
//! ```ignore
//! use md_fanout::{DataType, MarketDataHub, Trade};
//!
//! let hub: MarketDataHub = MarketDataHub::new();
//!
//! let id = hub.subscribe(DataType::Trade, |_, data| {
//!     println!("{data:?}");
//! });
//!
//! hub.publish_trade(Trade { price: 50_000.0, ..Trade::default() });
//!
//! hub.unsubscribe(id);
//! ```
//!
//! # Design overview
//!
//! Each slot carries a 32-bit sequence number next to its payload. A
//! write claims the next sequence, fills the payload, then release-stores
//! the sequence; a reader acquire-loads it and accepts the slot when the
//! signed difference to its own cursor is non-negative. That single
//! release/acquire edge is the entire publication protocol; see
//! [`spmc_ring`] for the details and [`hub`] for the subscriber
//! lifecycle on top.

#[cfg(not(unix))]
compile_error!("This crate only supports Unix-like operating systems.");

pub mod hub;
pub mod market_data;
pub mod spmc_ring;
mod utils;

pub use hub::{DEFAULT_RING_CAPACITY, MarketDataHub, SubscriberId};
pub use market_data::{BookL1, DataType, Kline, MarketData, SYMBOL_LEN, Symbol, Trade};
pub use spmc_ring::{Reader, SpmcRing, Writer};
pub use utils::{LatencyStats, mono_time_ns};
