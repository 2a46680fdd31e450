//! # Refill and Consumption Algorithm
//!
//! Pure functions turning `(state, configuration, now, request)` into
//! `(result, new_state)`. Nothing in this module touches a lock, a clock, or
//! an I/O boundary — that's `local_bucket`/`grid`'s job. Keeping the
//! algorithm pure is what lets `local_bucket` retry it freely inside a CAS
//! loop and what lets `grid` ship it as an entry processor.
//!
//! See spec.md §4.2/§4.3 for the formulas this module implements.

use crate::bandwidth::{Bandwidth, RefillStrategy};
use crate::error::ThrottlerError;
use crate::state::{BandwidthState, BucketState, Configuration};

fn refill_one(bandwidth: &Bandwidth, state: &BandwidthState, now_nanos: u64) -> BandwidthState {
    let elapsed = now_nanos.wrapping_sub(state.last_refill_nanos);
    // Refill is monotonic: a clock that appears to go backwards (or a very
    // large elapsed value from wraparound) is treated as zero elapsed rather
    // than reinterpreted, per spec.md §4.3's clock-wrap edge case.
    if elapsed == 0 || elapsed > i64::MAX as u64 {
        return *state;
    }

    let period = bandwidth.refill_period_nanos();
    let rate = bandwidth.refill_tokens();

    let (added, new_last_refill, new_rounding_error) = match bandwidth.strategy() {
        RefillStrategy::Smooth => {
            let budget = elapsed as u128 * rate as u128 + state.rounding_error_nanos as u128;
            let added = (budget / period as u128) as u64;
            let consumed_nanos = added as u128 * period as u128 / rate as u128;
            let remainder = budget - consumed_nanos * rate as u128;
            (
                added,
                state.last_refill_nanos.wrapping_add(consumed_nanos as u64),
                remainder as u64,
            )
        }
        RefillStrategy::Intervally => {
            let periods_completed = elapsed / period;
            let added = periods_completed * rate;
            (
                added,
                state
                    .last_refill_nanos
                    .wrapping_add(periods_completed * period),
                0,
            )
        }
    };

    let capacity = bandwidth.capacity() as i64;
    BandwidthState {
        current_tokens: state.current_tokens.saturating_add(added as i64).min(capacity),
        last_refill_nanos: new_last_refill,
        rounding_error_nanos: new_rounding_error,
    }
}

/// Applies refill independently to every bandwidth; no cross-bandwidth
/// coupling happens here (spec.md §4.2 "multi-bandwidth refill").
pub fn refill_all(configuration: &Configuration, state: &BucketState, now_nanos: u64) -> BucketState {
    let bandwidths = configuration
        .bandwidths()
        .iter()
        .zip(state.bandwidths.iter())
        .map(|(b, s)| refill_one(b, s, now_nanos))
        .collect();
    BucketState { bandwidths }
}

fn check_positive(n: u64) -> Result<(), ThrottlerError> {
    if n == 0 {
        return Err(ThrottlerError::InvalidArgument(
            "requested token count must be >= 1".into(),
        ));
    }
    Ok(())
}

/// `tryConsume(state, n, now)` — spec.md §4.3.
///
/// On failure, no tokens are debited from any bandwidth, but the refill
/// side-effect is still persisted in the returned state.
pub fn try_consume(
    configuration: &Configuration,
    state: &BucketState,
    n: u64,
    now_nanos: u64,
) -> Result<(bool, BucketState), ThrottlerError> {
    check_positive(n)?;
    let mut refilled = refill_all(configuration, state, now_nanos);
    if refilled.min_available_tokens() >= n {
        for b in refilled.bandwidths.iter_mut() {
            b.current_tokens -= n as i64;
        }
        Ok((true, refilled))
    } else {
        Ok((false, refilled))
    }
}

/// `consumeAsMuchAsPossible(state, limit, now)` — spec.md §4.3.
pub fn consume_as_much_as_possible(
    configuration: &Configuration,
    state: &BucketState,
    limit: Option<u64>,
    now_nanos: u64,
) -> Result<(u64, BucketState), ThrottlerError> {
    let mut refilled = refill_all(configuration, state, now_nanos);
    let available = refilled.min_available_tokens();
    let consumed = match limit {
        Some(limit) => limit.min(available),
        None => available,
    };
    for b in refilled.bandwidths.iter_mut() {
        b.current_tokens -= consumed as i64;
    }
    Ok((consumed, refilled))
}

/// The minimal nanoseconds of additional refill before `bandwidth`'s
/// `current_tokens` reaches `n`, the inverse of the refill formula. Must
/// mirror `refill_one`'s own branch on `strategy`: a Smooth bandwidth accrues
/// fractional tokens continuously, but an Intervally one only ever adds a
/// whole `refill_tokens` lump at a period boundary, so waiting for less than
/// a full period buys nothing.
fn nanos_to_reach(bandwidth: &Bandwidth, current_tokens: i64, n: u64) -> u64 {
    let deficit = n as i64 - current_tokens;
    if deficit <= 0 {
        return 0;
    }
    let deficit = deficit as u128;
    let period = bandwidth.refill_period_nanos() as u128;
    let rate = bandwidth.refill_tokens() as u128;
    match bandwidth.strategy() {
        RefillStrategy::Smooth => {
            // Ceiling division: we need at least `deficit` tokens worth of nanos.
            ((deficit * period + rate - 1) / rate).min(u64::MAX as u128) as u64
        }
        RefillStrategy::Intervally => {
            let periods_needed = (deficit + rate - 1) / rate;
            (periods_needed * period).min(u64::MAX as u128) as u64
        }
    }
}

/// Outcome of [`try_consume_and_reserve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationOutcome {
    /// Debit applied; caller should park for this many nanoseconds before
    /// treating the operation as complete.
    Reserved { wait_nanos: u64 },
    /// The request can never be satisfied, or would exceed `max_wait_nanos`.
    /// State is unchanged apart from the refill side-effect.
    Rejected,
}

/// `tryConsumeAndReserve(state, n, now, maxWaitNanos)` — spec.md §4.3.
///
/// Debiting is allowed to drive tokens negative: this is the reservation
/// itself, letting concurrent reservers see each other's pending demand
/// without a separate queue (spec.md §4.3 "rationale for the reservation
/// policy").
pub fn try_consume_and_reserve(
    configuration: &Configuration,
    state: &BucketState,
    n: u64,
    now_nanos: u64,
    max_wait_nanos: u64,
) -> Result<(ReservationOutcome, BucketState), ThrottlerError> {
    check_positive(n)?;
    let refilled = refill_all(configuration, state, now_nanos);

    if n > configuration.min_capacity() {
        return Ok((ReservationOutcome::Rejected, refilled));
    }

    let wait_nanos = configuration
        .bandwidths()
        .iter()
        .zip(refilled.bandwidths.iter())
        .map(|(b, s)| nanos_to_reach(b, s.current_tokens, n))
        .max()
        .unwrap_or(0);

    if wait_nanos > max_wait_nanos {
        return Ok((ReservationOutcome::Rejected, refilled));
    }

    let mut reserved = refilled;
    for b in reserved.bandwidths.iter_mut() {
        b.current_tokens -= n as i64;
    }
    Ok((ReservationOutcome::Reserved { wait_nanos }, reserved))
}

/// `addTokens(state, n, now)` — spec.md §4.3.
pub fn add_tokens(
    configuration: &Configuration,
    state: &BucketState,
    n: u64,
    now_nanos: u64,
) -> Result<BucketState, ThrottlerError> {
    check_positive(n)?;
    let mut refilled = refill_all(configuration, state, now_nanos);
    for (b, s) in configuration.bandwidths().iter().zip(refilled.bandwidths.iter_mut()) {
        s.current_tokens = s.current_tokens.saturating_add(n as i64).min(b.capacity() as i64);
    }
    Ok(refilled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bandwidth::Bandwidth;
    use std::time::Duration;

    fn single(bandwidth: Bandwidth) -> (Configuration, BucketState) {
        let cfg = Configuration::new(vec![bandwidth]).unwrap();
        let state = BucketState::new(&cfg, 0);
        (cfg, state)
    }

    #[test]
    fn s1_simple_exhaustion() {
        let (cfg, state) = single(Bandwidth::simple(10, Duration::from_secs(86_400)).unwrap());
        let (ok, state) = try_consume(&cfg, &state, 10, 0).unwrap();
        assert!(ok);
        let (ok, _) = try_consume(&cfg, &state, 1, 0).unwrap();
        assert!(!ok);
    }

    #[test]
    fn try_consume_does_not_debit_on_failure() {
        let (cfg, state) = single(Bandwidth::simple(5, Duration::from_secs(10)).unwrap());
        let (ok, new_state) = try_consume(&cfg, &state, 3, 0).unwrap();
        assert!(ok);
        let (ok, unchanged) = try_consume(&cfg, &new_state, 100, 0).unwrap();
        assert!(!ok);
        assert_eq!(unchanged.min_available_tokens(), new_state.min_available_tokens());
    }

    #[test]
    fn rejects_non_positive_request() {
        let (cfg, state) = single(Bandwidth::simple(5, Duration::from_secs(10)).unwrap());
        assert!(try_consume(&cfg, &state, 0, 0).is_err());
    }

    #[test]
    fn intervally_refill_adds_whole_periods() {
        let (cfg, state) = single(Bandwidth::classic(100, 10, Duration::from_secs(1), 0).unwrap());
        let refilled = refill_all(&cfg, &state, 0); // 0 elapsed, no refill yet
        assert_eq!(refilled.min_available_tokens(), 0);

        let b = Bandwidth::new(
            100,
            10,
            Duration::from_secs(1),
            0,
            RefillStrategy::Intervally,
            None,
        )
        .unwrap();
        let (cfg2, state2) = single(b);
        let refilled2 = refill_all(&cfg2, &state2, 3_500_000_000); // 3.5 periods
        assert_eq!(refilled2.min_available_tokens(), 30);
    }

    #[test]
    fn smooth_refill_has_no_long_run_drift() {
        let (cfg, state) = single(Bandwidth::classic(1_000_000, 3, Duration::from_secs(7), 0).unwrap());
        // Advance in small, non-aligned steps and check against floor(T*rate/period).
        let mut s = state;
        let step = 1_000_000_007u64; // deliberately not a multiple of the period
        let mut now = 0u64;
        for _ in 0..50 {
            now += step;
            s = refill_all(&cfg, &s, now);
        }
        let expected = (now as u128 * 3 / 7_000_000_000) as i64;
        assert!((s.bandwidths[0].current_tokens - expected).abs() <= 1);
    }

    #[test]
    fn consume_as_much_as_possible_caps_at_available() {
        let (cfg, state) = single(Bandwidth::simple(10, Duration::from_secs(10)).unwrap());
        let (consumed, new_state) = consume_as_much_as_possible(&cfg, &state, Some(100), 0).unwrap();
        assert_eq!(consumed, 10);
        assert_eq!(new_state.min_available_tokens(), 0);
    }

    #[test]
    fn consume_as_much_as_possible_respects_limit() {
        let (cfg, state) = single(Bandwidth::simple(10, Duration::from_secs(10)).unwrap());
        let (consumed, new_state) = consume_as_much_as_possible(&cfg, &state, Some(4), 0).unwrap();
        assert_eq!(consumed, 4);
        assert_eq!(new_state.min_available_tokens(), 6);
    }

    #[test]
    fn s3_reservation_wait_matches_expected_schedule() {
        let (cfg, state) = single(Bandwidth::simple(10, Duration::from_secs(10)).unwrap());
        // Drain the bucket first.
        let (_, state) = try_consume(&cfg, &state, 10, 0).unwrap();

        let (outcome, state) =
            try_consume_and_reserve(&cfg, &state, 3, 0, u64::MAX).unwrap();
        let first_wait = match outcome {
            ReservationOutcome::Reserved { wait_nanos } => wait_nanos,
            ReservationOutcome::Rejected => panic!("expected reservation"),
        };
        assert_eq!(first_wait, 3_000_000_000);

        let (outcome, _) = try_consume_and_reserve(&cfg, &state, 3, 0, u64::MAX).unwrap();
        let second_wait = match outcome {
            ReservationOutcome::Reserved { wait_nanos } => wait_nanos,
            ReservationOutcome::Rejected => panic!("expected reservation"),
        };
        assert_eq!(second_wait, 6_000_000_000);
    }

    #[test]
    fn intervally_reservation_wait_rounds_up_to_next_period_boundary() {
        let b = Bandwidth::new(100, 10, Duration::from_secs(1), 0, RefillStrategy::Intervally, None).unwrap();
        let (cfg, state) = single(b);

        // deficit=5 against a 10-token/period bandwidth needs one whole
        // period, not the continuous formula's half a period.
        let (outcome, _) = try_consume_and_reserve(&cfg, &state, 5, 0, u64::MAX).unwrap();
        let wait = match outcome {
            ReservationOutcome::Reserved { wait_nanos } => wait_nanos,
            ReservationOutcome::Rejected => panic!("expected reservation"),
        };
        assert_eq!(wait, 1_000_000_000);
    }

    #[test]
    fn reservation_rejects_when_over_max_wait() {
        let (cfg, state) = single(Bandwidth::simple(10, Duration::from_secs(10)).unwrap());
        let (_, state) = try_consume(&cfg, &state, 10, 0).unwrap();
        let (outcome, _) = try_consume_and_reserve(&cfg, &state, 3, 0, 1).unwrap();
        assert_eq!(outcome, ReservationOutcome::Rejected);
    }

    #[test]
    fn reservation_rejects_request_larger_than_capacity() {
        let (cfg, state) = single(Bandwidth::simple(10, Duration::from_secs(10)).unwrap());
        let (outcome, _) = try_consume_and_reserve(&cfg, &state, 11, 0, u64::MAX).unwrap();
        assert_eq!(outcome, ReservationOutcome::Rejected);
    }

    #[test]
    fn add_tokens_caps_at_capacity() {
        let (cfg, state) = single(Bandwidth::simple(10, Duration::from_secs(10)).unwrap());
        let (_, state) = try_consume(&cfg, &state, 5, 0).unwrap();
        let state = add_tokens(&cfg, &state, 100, 0).unwrap();
        assert_eq!(state.min_available_tokens(), 10);
    }

    #[test]
    fn multi_bandwidth_restrictiveness() {
        let loose = Bandwidth::simple(1000, Duration::from_secs(60)).unwrap();
        let strict = Bandwidth::simple(200, Duration::from_secs(10)).unwrap();
        let cfg = Configuration::new(vec![loose, strict]).unwrap();
        let state = BucketState::new(&cfg, 0);
        let (ok, state) = try_consume(&cfg, &state, 200, 0).unwrap();
        assert!(ok);
        let (ok, _) = try_consume(&cfg, &state, 1, 0).unwrap();
        assert!(!ok, "strict bandwidth should dominate even though loose has headroom");
    }

    #[test]
    fn clock_going_backwards_is_zero_elapsed() {
        let (cfg, state) = single(Bandwidth::classic(10, 5, Duration::from_secs(1), 0).unwrap());
        let mut s = state;
        s.bandwidths[0].last_refill_nanos = 1_000_000_000;
        let refilled = refill_one(&cfg.bandwidths()[0], &s.bandwidths[0], 500_000_000);
        assert_eq!(refilled.current_tokens, 0);
    }
}
