//! Incremental per-key window aggregation.
//!
//! State lives in an arena keyed by `(account, window)`. Each entry owns an
//! accumulator and an explicit lifecycle phase; firing is watermark-driven
//! and accumulating, so late data re-fires an updated result until the
//! instance is evicted at `end + allowed_lateness`.

use chrono::{DateTime, Duration, Utc};
use rustc_hash::FxHashMap;
use tracing::debug;
use vitalflow_core::{AccountId, WindowRange, WindowSpec};

/// Incremental reducer state.
///
/// Merging two partial states must agree with applying the union of their
/// samples in any order; the arena itself only ever applies, but the merge
/// law is part of the contract and is exercised by the tests.
pub trait Accumulator: Default + Clone + Send + 'static {
    type Sample: Copy + Send;

    /// Fold one sample into the state.
    fn apply(&mut self, sample: Self::Sample);

    /// Fold another partial state into this one.
    fn merge(&mut self, other: &Self);
}

/// Running sum of step counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SumState {
    total: i64,
}

impl SumState {
    pub fn total(&self) -> i64 {
        self.total
    }
}

impl Accumulator for SumState {
    type Sample = i64;

    fn apply(&mut self, sample: i64) {
        self.total += sample;
    }

    fn merge(&mut self, other: &Self) {
        self.total += other.total;
    }
}

/// Running `(sum, count)` pair for glucose means.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MeanState {
    sum: f64,
    count: u64,
}

impl MeanState {
    /// Current mean; an empty state yields 0, never NaN.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

impl Accumulator for MeanState {
    type Sample = f64;

    fn apply(&mut self, sample: f64) {
        self.sum += sample;
        self.count += 1;
    }

    fn merge(&mut self, other: &Self) {
        self.sum += other.sum;
        self.count += other.count;
    }
}

/// Lifecycle of a window instance's aggregation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPhase {
    /// Accepting updates; the watermark has not reached the window end.
    Open,
    /// Watermark passed the end; an emission is pending.
    Fireable,
    /// Emitted at least once; still mutable until eviction.
    Fired,
    /// Past `end + allowed_lateness`; assigned just before removal.
    Evicted,
}

impl WindowPhase {
    /// Whether an instance in this phase still accepts samples.
    pub fn accepts_updates(self) -> bool {
        !matches!(self, WindowPhase::Evicted)
    }
}

#[derive(Debug, Clone)]
struct WindowState<A> {
    accumulator: A,
    phase: WindowPhase,
    /// Set on every update, cleared on emission; a dirty `Fired` instance
    /// re-fires on the next watermark advance.
    dirty: bool,
}

/// A fired aggregate: the instance identity plus an accumulator snapshot.
#[derive(Debug, Clone)]
pub struct FiredWindow<A> {
    pub account: AccountId,
    pub window: WindowRange,
    pub accumulator: A,
}

/// Result of a watermark advance over one arena.
#[derive(Debug)]
pub struct AdvanceOutcome<A> {
    pub fired: Vec<FiredWindow<A>>,
    pub evicted: usize,
}

/// Per-key aggregation state for one window specification.
///
/// The arena is owned by a single shard task; nothing here is shared. Late
/// events are the caller's concern: anything older than
/// `watermark - allowed_lateness` must be dropped before reaching `apply`,
/// which guarantees no sample ever targets an evicted instance.
pub struct AggregationArena<A: Accumulator> {
    label: &'static str,
    spec: WindowSpec,
    allowed_lateness: Duration,
    states: FxHashMap<(AccountId, WindowRange), WindowState<A>>,
}

impl<A: Accumulator> AggregationArena<A> {
    pub fn new(label: &'static str, spec: WindowSpec, allowed_lateness: Duration) -> Self {
        Self {
            label,
            spec,
            allowed_lateness,
            states: FxHashMap::default(),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn spec(&self) -> WindowSpec {
        self.spec
    }

    /// Fold a sample into every window instance its event time maps to.
    pub fn apply(&mut self, account: &AccountId, event_time: DateTime<Utc>, sample: A::Sample) {
        for window in self.spec.assign(event_time) {
            let state = self
                .states
                .entry((account.clone(), window))
                .or_insert_with(|| WindowState {
                    accumulator: A::default(),
                    phase: WindowPhase::Open,
                    dirty: false,
                });
            if !state.phase.accepts_updates() {
                continue;
            }
            state.accumulator.apply(sample);
            state.dirty = true;
        }
    }

    /// Advance the watermark: fire newly-complete instances, re-fire dirty
    /// ones, and evict everything past `end + allowed_lateness`.
    pub fn advance(&mut self, watermark: DateTime<Utc>) -> AdvanceOutcome<A> {
        let mut fired = Vec::new();
        let mut evicted = 0;
        let lateness = self.allowed_lateness;
        let label = self.label;

        self.states.retain(|(account, window), state| {
            if watermark < window.end {
                return true;
            }
            if state.phase == WindowPhase::Open {
                state.phase = WindowPhase::Fireable;
            }
            // Emission precedes eviction so the final late update is never lost
            if state.phase == WindowPhase::Fireable
                || (state.phase == WindowPhase::Fired && state.dirty)
            {
                fired.push(FiredWindow {
                    account: account.clone(),
                    window: *window,
                    accumulator: state.accumulator.clone(),
                });
                state.phase = WindowPhase::Fired;
                state.dirty = false;
            }
            if window.end + lateness <= watermark {
                state.phase = WindowPhase::Evicted;
                evicted += 1;
                debug!(
                    stream = label,
                    account = account.as_ref(),
                    window = %window,
                    "evicted window instance"
                );
                return false;
            }
            true
        });

        AdvanceOutcome { fired, evicted }
    }

    /// Shutdown flush: emit post-end instances whose latest state has not
    /// been fired yet; `Open` instances are discarded silently.
    pub fn drain(&mut self) -> Vec<FiredWindow<A>> {
        let mut fired = Vec::new();
        for ((account, window), state) in self.states.drain() {
            let pending = match state.phase {
                WindowPhase::Fireable => true,
                WindowPhase::Fired => state.dirty,
                WindowPhase::Open | WindowPhase::Evicted => false,
            };
            if pending {
                fired.push(FiredWindow {
                    account,
                    window,
                    accumulator: state.accumulator,
                });
            }
        }
        fired
    }

    /// Lifecycle phase of one instance, if it is resident.
    pub fn phase(&self, account: &AccountId, window: &WindowRange) -> Option<WindowPhase> {
        self.states
            .get(&(account.clone(), *window))
            .map(|s| s.phase)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
