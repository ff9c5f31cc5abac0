//! Time-based vesting math for open streams.
//!
//! Everything here is a pure function of a stored [`Stream`] and a ledger
//! timestamp. Lifecycle status is derived from the stored timestamps rather
//! than kept as a separate field, so it can never drift from them.

use crate::{Stream, StreamStatus};

/// Length of one accrual period (30 days). `Stream::rate` is expressed per period.
pub const SECONDS_PER_PERIOD: u64 = 2_592_000;

/// First timestamp at which anything can be claimed.
pub fn cliff_end(stream: &Stream) -> u64 {
    stream.created_at.saturating_add(stream.cliff_period)
}

/// End of the grace window, if the stream was terminated. Vesting stops here.
pub fn freeze_at(stream: &Stream) -> Option<u64> {
    stream
        .terminated_at
        .map(|terminated_at| terminated_at.saturating_add(stream.termination_period))
}

/// The timestamp vesting is evaluated at: `now`, capped at the freeze point.
pub fn effective_now(stream: &Stream, now: u64) -> u64 {
    match freeze_at(stream) {
        Some(freeze) => now.min(freeze),
        None => now,
    }
}

/// Lifecycle status of the record stored for a payee (if any) at `now`.
pub fn status_at(stream: Option<&Stream>, now: u64) -> StreamStatus {
    let Some(stream) = stream else {
        return StreamStatus::NoStream;
    };
    match freeze_at(stream) {
        None => StreamStatus::Active,
        Some(freeze) if now < freeze => StreamStatus::Terminating,
        Some(_) => StreamStatus::Closed,
    }
}

/// Amount vested since the last claim checkpoint and not yet paid out.
///
/// Returns 0 before the cliff and whenever the (frozen) evaluation point does
/// not lie after `max(claimed_at, cliff_end)`. Division always floors.
pub fn calculate_accrued_amount(stream: &Stream, now: u64) -> i128 {
    let cliff = cliff_end(stream);
    if now < cliff {
        return 0;
    }

    let end = effective_now(stream, now);
    let start = stream.claimed_at.max(cliff);
    if end <= start {
        return 0;
    }

    prorate(end - start, stream.rate)
}

/// `floor(elapsed * rate / SECONDS_PER_PERIOD)` without overflowing on the
/// intermediate product. Saturates at `i128::MAX`.
fn prorate(elapsed: u64, rate: i128) -> i128 {
    let period = SECONDS_PER_PERIOD as i128;
    let elapsed = elapsed as i128;

    // elapsed = q * period + r  =>  floor(elapsed * rate / period) = q * rate + floor(r * rate / period)
    let whole = (elapsed / period).checked_mul(rate);
    let partial = (elapsed % period).checked_mul(rate).map(|v| v / period);

    match (whole, partial) {
        (Some(whole), Some(partial)) => whole.checked_add(partial).unwrap_or(i128::MAX),
        _ => i128::MAX,
    }
}
