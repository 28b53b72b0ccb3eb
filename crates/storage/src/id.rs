//! Globally unique document ids.
//!
//! [`IdGenerator`] produces Snowflake-style 64-bit ids rendered as decimal
//! strings. The layout, from most to least significant bit:
//!
//! | Bits | Field |
//! |------|-------|
//! | 41 | milliseconds since [`EPOCH_MILLIS`] |
//! | 5 | datacenter id |
//! | 5 | worker id |
//! | 12 | per-millisecond sequence |
//!
//! Datacenter and worker come from [`ServiceInfo`], so instances that share a
//! store must be given distinct `(datacenter, worker)` pairs.

use std::sync::{Arc, LazyLock};

use chrono::Utc;
use parking_lot::Mutex;

use crate::config::ServiceInfo;

/// Custom epoch for id timestamps (2010-11-04T01:42:54.657Z).
pub const EPOCH_MILLIS: i64 = 1_288_834_974_657;

const WORKER_BITS: u32 = 5;
const DATACENTER_BITS: u32 = 5;
const SEQUENCE_BITS: u32 = 12;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;
const WORKER_SHIFT: u32 = SEQUENCE_BITS;
const DATACENTER_SHIFT: u32 = SEQUENCE_BITS + WORKER_BITS;
const TIMESTAMP_SHIFT: u32 = SEQUENCE_BITS + WORKER_BITS + DATACENTER_BITS;

static SHARED: LazyLock<Arc<IdGenerator>> = LazyLock::new(|| Arc::new(IdGenerator::default()));

#[derive(Debug)]
struct State {
    last_millis: i64,
    sequence: u64,
}

/// Thread-safe generator of unique, roughly time-ordered string ids.
#[derive(Debug)]
pub struct IdGenerator {
    datacenter_id: u64,
    worker_id: u64,
    state: Mutex<State>,
}

impl IdGenerator {
    /// Creates a generator for the given datacenter and worker (both `0..32`,
    /// higher bits are masked off).
    #[must_use]
    pub fn new(datacenter_id: u8, worker_id: u8) -> Self {
        Self {
            datacenter_id: u64::from(datacenter_id) & ((1 << DATACENTER_BITS) - 1),
            worker_id: u64::from(worker_id) & ((1 << WORKER_BITS) - 1),
            state: Mutex::new(State { last_millis: 0, sequence: 0 }),
        }
    }

    /// Creates a generator seeded from the running instance's identity.
    #[must_use]
    pub fn from_service(info: &ServiceInfo) -> Self {
        Self::new(info.datacenter_id(), info.worker_id())
    }

    /// The process-wide generator.
    ///
    /// Every caller gets the same instance, so ids minted through it never
    /// collide within the process.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::clone(&SHARED)
    }

    /// Returns the next id as a number.
    ///
    /// When the 12-bit sequence is exhausted within one millisecond the call
    /// spins until the clock moves on. If the clock goes backwards the last
    /// observed timestamp is reused, so ids stay strictly increasing.
    pub fn next_id(&self) -> u64 {
        let mut state = self.state.lock();
        let mut now = Utc::now().timestamp_millis().max(state.last_millis);

        if now == state.last_millis {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                while now <= state.last_millis {
                    std::hint::spin_loop();
                    now = Utc::now().timestamp_millis();
                }
            }
        } else {
            state.sequence = 0;
        }
        state.last_millis = now;

        let elapsed = (now - EPOCH_MILLIS).max(0) as u64;
        (elapsed << TIMESTAMP_SHIFT)
            | (self.datacenter_id << DATACENTER_SHIFT)
            | (self.worker_id << WORKER_SHIFT)
            | state.sequence
    }

    /// Returns the next id rendered as a decimal string.
    pub fn next_id_string(&self) -> String {
        self.next_id().to_string()
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new(1, 0)
    }
}
