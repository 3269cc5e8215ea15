//! Arena/Client metrics: lazily registered `metrics` counters/gauges
//! local to the subsystem they describe.

use metrics::{counter, gauge, Counter, Gauge};
use std::sync::LazyLock;

static METRIC_ARENA_CAPACITY: LazyLock<Gauge> = LazyLock::new(|| gauge!("ethlink_arena_capacity"));
static METRIC_ARENA_ALLOC: LazyLock<Counter> = LazyLock::new(|| counter!("ethlink_arena_alloc"));
static METRIC_ARENA_FREE: LazyLock<Counter> = LazyLock::new(|| counter!("ethlink_arena_free"));

static METRIC_TX_BACKPRESSURE: LazyLock<Counter> =
    LazyLock::new(|| counter!("ethlink_tx_backpressure"));
static METRIC_RX_WOULD_BLOCK: LazyLock<Counter> =
    LazyLock::new(|| counter!("ethlink_rx_would_block"));
static METRIC_RX_REFILL_DROPPED: LazyLock<Counter> =
    LazyLock::new(|| counter!("ethlink_rx_refill_dropped"));

/// [`crate::Arena::create`] finished mapping a new region.
pub(crate) fn arena_created(slot_count: u32) {
    METRIC_ARENA_CAPACITY.set(slot_count as f64);
}

/// [`crate::Arena::alloc`] handed out a slot.
pub(crate) fn arena_alloc() {
    METRIC_ARENA_ALLOC.increment(1);
}

/// [`crate::Arena::free`] reclaimed a slot.
pub(crate) fn arena_free() {
    METRIC_ARENA_FREE.increment(1);
}

/// `alloc_for_send` returned `None` because `tx_in_flight == TX_DEPTH`.
pub(crate) fn tx_backpressure() {
    METRIC_TX_BACKPRESSURE.increment(1);
}

/// `recv` surfaced `WouldBlock`.
pub(crate) fn rx_would_block() {
    METRIC_RX_WOULD_BLOCK.increment(1);
}

/// `rx_refill` had to return slots the RX FIFO refused within one write.
pub(crate) fn rx_refill_dropped(n: u64) {
    if n > 0 {
        METRIC_RX_REFILL_DROPPED.increment(n);
    }
}
