//! Co-group join of fired step sums and glucose means.
//!
//! Both input streams are re-windowed onto a common output grid: each fired
//! window lands in the grid slot ending at its own end. A slot emits as soon
//! as both sides are present and is closed by the watermark once past
//! `end + allowed_lateness`; a slot still one-sided at close emits partially
//! with the missing aggregate defaulted to zero. The buffer is bounded, and
//! overflow force-closes the oldest slot rather than growing without limit.

use chrono::{DateTime, Duration, Utc};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};
use vitalflow_core::{AccountId, WindowRange};

/// A fired step-sum aggregate entering the join.
#[derive(Debug, Clone)]
pub struct FiredSum {
    pub account: AccountId,
    pub window: WindowRange,
    pub total_steps: i64,
}

/// A fired glucose-mean aggregate entering the join.
#[derive(Debug, Clone)]
pub struct FiredMean {
    pub account: AccountId,
    pub window: WindowRange,
    pub avg_glucose: f64,
}

/// One side of the join.
#[derive(Debug, Clone)]
pub enum JoinInput {
    Steps(FiredSum),
    Glucose(FiredMean),
}

/// A joined (or partially joined) output row on the output grid.
#[derive(Debug, Clone)]
pub struct JoinedPair {
    pub account: AccountId,
    pub window: WindowRange,
    pub total_steps: i64,
    pub avg_glucose: f64,
    /// True when one side was still missing at emission time.
    pub partial: bool,
}

#[derive(Debug, Default)]
struct JoinSlot {
    steps: Option<i64>,
    glucose: Option<f64>,
    /// A complete pair already went out; the sides stay resident until the
    /// slot closes so a re-fired side joins against real data, never a zero.
    emitted: bool,
}

/// Counters and buffer occupancy for observability.
#[derive(Debug, Clone, Copy, Default)]
pub struct JoinStats {
    pub buffered_slots: usize,
    pub partial_emits: u64,
    pub forced_evictions: u64,
}

/// Buffering co-group joiner keyed by `(account, output slot)`.
pub struct CoGroupJoiner {
    output_period_secs: i64,
    allowed_lateness: Duration,
    capacity: usize,
    slots: FxHashMap<(AccountId, WindowRange), JoinSlot>,
    partial_emits: u64,
    forced_evictions: u64,
}

impl CoGroupJoiner {
    pub fn new(output_period_secs: i64, allowed_lateness: Duration, capacity: usize) -> Self {
        Self {
            output_period_secs,
            allowed_lateness,
            capacity,
            slots: FxHashMap::default(),
            partial_emits: 0,
            forced_evictions: 0,
        }
    }

    /// Feed one fired aggregate; returns everything ready to emit.
    ///
    /// The first completion of a slot emits immediately; a re-fired side on
    /// an already-emitted slot re-emits the updated pair (accumulating,
    /// at-least-once). Overflow beyond capacity force-closes the oldest
    /// slots and appends their partial rows.
    pub fn push(&mut self, input: JoinInput) -> Vec<JoinedPair> {
        let (account, window) = match &input {
            JoinInput::Steps(s) => (s.account.clone(), s.window),
            JoinInput::Glucose(g) => (g.account.clone(), g.window),
        };
        let slot_window = window.output_slot(self.output_period_secs);

        let slot = self
            .slots
            .entry((account.clone(), slot_window))
            .or_default();
        match input {
            JoinInput::Steps(s) => slot.steps = Some(s.total_steps),
            JoinInput::Glucose(g) => slot.glucose = Some(g.avg_glucose),
        }

        let mut out = Vec::new();
        if let (Some(total_steps), Some(avg_glucose)) = (slot.steps, slot.glucose) {
            slot.emitted = true;
            debug!(
                account = account.as_ref(),
                window = %slot_window,
                total_steps,
                avg_glucose,
                "join complete"
            );
            out.push(JoinedPair {
                account,
                window: slot_window,
                total_steps,
                avg_glucose,
                partial: false,
            });
        }

        self.enforce_capacity(&mut out);
        out
    }

    /// Close every slot past `end + allowed_lateness`. One-sided slots emit
    /// partially; completed slots just leave the buffer.
    pub fn close(&mut self, watermark: DateTime<Utc>) -> Vec<JoinedPair> {
        let lateness = self.allowed_lateness;
        let mut out = Vec::new();
        self.slots.retain(|(account, window), slot| {
            if watermark < window.end + lateness {
                return true;
            }
            if !slot.emitted {
                out.push(Self::partial_pair(account.clone(), *window, slot));
            }
            false
        });
        self.partial_emits += out.len() as u64;
        out
    }

    /// Shutdown flush: emit every slot that never completed, then clear.
    pub fn drain(&mut self) -> Vec<JoinedPair> {
        let mut out = Vec::new();
        for ((account, window), slot) in self.slots.drain() {
            if !slot.emitted {
                out.push(Self::partial_pair(account, window, &slot));
            }
        }
        self.partial_emits += out.len() as u64;
        out
    }

    pub fn stats(&self) -> JoinStats {
        JoinStats {
            buffered_slots: self.slots.len(),
            partial_emits: self.partial_emits,
            forced_evictions: self.forced_evictions,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn partial_pair(account: AccountId, window: WindowRange, slot: &JoinSlot) -> JoinedPair {
        let missing = if slot.steps.is_none() {
            "steps"
        } else {
            "glucose"
        };
        warn!(
            account = account.as_ref(),
            window = %window,
            missing,
            "partial join: output window closed with one side absent"
        );
        JoinedPair {
            account,
            window,
            total_steps: slot.steps.unwrap_or(0),
            avg_glucose: slot.glucose.unwrap_or(0.0),
            partial: true,
        }
    }

    /// Force-close oldest slots until the buffer fits its capacity. Only
    /// engages under sustained one-sided skew; the watermark path is the
    /// normal way out of the buffer.
    fn enforce_capacity(&mut self, out: &mut Vec<JoinedPair>) {
        while self.slots.len() > self.capacity {
            let victim = self
                .slots
                .iter()
                .min_by_key(|((_, window), _)| window.end)
                .map(|(key, _)| key.clone());
            let Some(key) = victim else { break };
            let slot = self.slots.remove(&key).unwrap_or_default();
            self.forced_evictions += 1;
            if !slot.emitted {
                self.partial_emits += 1;
                out.push(Self::partial_pair(key.0, key.1, &slot));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn steps(account: &str, start: i64, end: i64, total: i64) -> JoinInput {
        JoinInput::Steps(FiredSum {
            account: account.into(),
            window: WindowRange::from_secs(start, end),
            total_steps: total,
        })
    }

    fn glucose(account: &str, start: i64, end: i64, mean: f64) -> JoinInput {
        JoinInput::Glucose(FiredMean {
            account: account.into(),
            window: WindowRange::from_secs(start, end),
            avg_glucose: mean,
        })
    }

    fn joiner() -> CoGroupJoiner {
        CoGroupJoiner::new(300, Duration::seconds(300), 4096)
    }

    #[test]
    fn test_emits_when_both_sides_arrive() {
        let mut j = joiner();
        assert!(j.push(steps("A", 0, 300, 150)).is_empty());

        let out = j.push(glucose("A", -600, 300, 125.0));
        assert_eq!(out.len(), 1);
        let pair = &out[0];
        assert_eq!(&*pair.account, "A");
        assert_eq!(pair.window, WindowRange::from_secs(0, 300));
        assert_eq!(pair.total_steps, 150);
        assert_eq!(pair.avg_glucose, 125.0);
        assert!(!pair.partial);
    }

    #[test]
    fn test_sliding_window_lands_in_tail_slot() {
        let mut j = joiner();
        j.push(glucose("A", 600, 1500, 110.0));

        // The 15-minute mean ending at 1500 joins the 5-minute sum ending there
        let out = j.push(steps("A", 1200, 1500, 42));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].window, WindowRange::from_secs(1200, 1500));
        assert_eq!(out[0].total_steps, 42);
        assert_eq!(out[0].avg_glucose, 110.0);
    }

    #[test]
    fn test_partial_emit_on_close() {
        let mut j = joiner();
        j.push(steps("A", 0, 300, 150));

        // Not yet past end + lateness
        assert!(j.close(at(599)).is_empty());

        let out = j.close(at(600));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].total_steps, 150);
        assert_eq!(out[0].avg_glucose, 0.0);
        assert!(out[0].partial);
        assert!(j.is_empty());
        assert_eq!(j.stats().partial_emits, 1);
    }

    #[test]
    fn test_partial_emit_missing_steps_defaults_zero() {
        let mut j = joiner();
        j.push(glucose("A", -600, 300, 101.0));

        let out = j.close(at(600));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].total_steps, 0);
        assert_eq!(out[0].avg_glucose, 101.0);
        assert!(out[0].partial);
    }

    #[test]
    fn test_completed_slot_closes_silently() {
        let mut j = joiner();
        j.push(steps("A", 0, 300, 150));
        let emitted = j.push(glucose("A", -600, 300, 125.0));
        assert_eq!(emitted.len(), 1);

        // The pair already went out; closing must not produce a second row
        assert!(j.close(at(600)).is_empty());
        assert!(j.is_empty());
    }

    #[test]
    fn test_refire_reemits_with_retained_other_side() {
        let mut j = joiner();
        j.push(steps("A", 0, 300, 150));
        j.push(glucose("A", -600, 300, 125.0));

        // Late step data re-fires the window with an updated total
        let out = j.push(steps("A", 0, 300, 175));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].total_steps, 175);
        assert_eq!(out[0].avg_glucose, 125.0);
        assert!(!out[0].partial);
    }

    #[test]
    fn test_distinct_accounts_do_not_join() {
        let mut j = joiner();
        assert!(j.push(steps("A", 0, 300, 150)).is_empty());
        assert!(j.push(glucose("B", -600, 300, 125.0)).is_empty());
        assert_eq!(j.len(), 2);
    }

    #[test]
    fn test_capacity_forces_oldest_partial_out() {
        let mut j = CoGroupJoiner::new(300, Duration::seconds(300), 2);
        assert!(j.push(steps("A", 0, 300, 1)).is_empty());
        assert!(j.push(steps("A", 300, 600, 2)).is_empty());

        let out = j.push(steps("A", 600, 900, 3));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].window, WindowRange::from_secs(0, 300));
        assert_eq!(out[0].total_steps, 1);
        assert!(out[0].partial);

        assert_eq!(j.len(), 2);
        let stats = j.stats();
        assert_eq!(stats.forced_evictions, 1);
        assert_eq!(stats.partial_emits, 1);
    }

    #[test]
    fn test_drain_flushes_unfinished_slots() {
        let mut j = joiner();
        j.push(steps("A", 0, 300, 10));
        j.push(steps("B", 300, 600, 20));
        j.push(glucose("B", -300, 600, 99.0));

        let mut out = j.drain();
        out.sort_by(|a, b| a.account.cmp(&b.account));

        // B completed and was emitted from push; only A flushes here
        assert_eq!(out.len(), 1);
        assert_eq!(&*out[0].account, "A");
        assert!(out[0].partial);
        assert!(j.is_empty());
    }
}
