//! Bounded hardware waits
//!
//! Every place the driver waits on the device (oscillator start-up, FIFO space, range sweep,
//! TX completion, WOR listen window) goes through [`Poll::poll`]: a condition is sampled, and
//! between samples the caller's delay provider sleeps for the polling interval until the
//! deadline is spent. There is no clock involved; elapsed time is the sum of the intervals
//! slept, which is what a blocking embedded delay gives us.

use core::sync::atomic::{AtomicBool, Ordering};

use embedded_hal::delay::DelayNs;

use crate::error::{Error, HardwareError, WaitTarget};

/// External cancellation signal for blocking operations.
pub trait Cancel {
    /// True once the caller wants the operation abandoned.
    fn is_cancelled(&self) -> bool;
}

/// A [`Cancel`] that never fires.
#[derive(Debug, Clone, Copy, Default)]
pub struct Never;

impl Cancel for Never {
    fn is_cancelled(&self) -> bool {
        false
    }
}

impl Cancel for AtomicBool {
    fn is_cancelled(&self) -> bool {
        self.load(Ordering::Relaxed)
    }
}

impl<C: Cancel + ?Sized> Cancel for &C {
    fn is_cancelled(&self) -> bool {
        C::is_cancelled(self)
    }
}

/// Why a poll ended without the condition holding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError<E> {
    /// The condition itself failed
    Failed(E),
    /// The deadline passed
    TimedOut,
    /// The cancellation signal fired
    Cancelled,
}

/// Folds a wait outcome into the driver error, naming what was waited for on timeout.
pub(crate) fn into_error<E>(target: WaitTarget) -> impl FnOnce(WaitError<Error<E>>) -> Error<E> {
    move |e| match e {
        WaitError::Failed(e) => e,
        WaitError::TimedOut => Error::Hardware(HardwareError::Timeout(target)),
        WaitError::Cancelled => Error::Cancelled,
    }
}

/// Deadline and interval of a bounded wait, in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Poll {
    /// Total time budget
    pub timeout_us: u32,
    /// Sleep between samples
    pub interval_us: u32,
}

impl Poll {
    /// Creates a new wait description.
    pub const fn new(timeout_us: u32, interval_us: u32) -> Self {
        Self {
            timeout_us,
            interval_us,
        }
    }

    /// Number of samples this wait takes at most.
    pub fn max_samples(&self) -> u32 {
        self.timeout_us / self.interval_us.max(1) + 1
    }

    /// Samples `check` until it yields a value, the deadline passes or `cancel` fires.
    ///
    /// The condition is always sampled at least once, and once more at the deadline, so a
    /// zero timeout still performs a single check.
    ///
    /// # Errors
    /// * [`WaitError::Failed`] - `check` returned an error, which is passed through
    /// * [`WaitError::TimedOut`] - the deadline passed
    /// * [`WaitError::Cancelled`] - `cancel` fired between samples
    pub fn poll<D, C, T, E, F>(&self, delay: &mut D, cancel: &C, mut check: F) -> Result<T, WaitError<E>>
    where
        D: DelayNs + ?Sized,
        C: Cancel + ?Sized,
        F: FnMut() -> Result<Option<T>, E>,
    {
        let interval = self.interval_us.max(1);
        let mut elapsed: u32 = 0;

        loop {
            if let Some(value) = check().map_err(WaitError::Failed)? {
                return Ok(value);
            }
            if cancel.is_cancelled() {
                return Err(WaitError::Cancelled);
            }
            if elapsed >= self.timeout_us {
                return Err(WaitError::TimedOut);
            }

            delay.delay_us(interval);
            elapsed = elapsed.saturating_add(interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::NoopDelay;

    #[test]
    fn test_poll_returns_first_ready_value() {
        let mut samples = 0;
        let result: Result<u8, WaitError<()>> =
            Poll::new(1_000, 100).poll(&mut NoopDelay, &Never, || {
                samples += 1;
                Ok((samples == 3).then_some(7))
            });

        assert_eq!(result, Ok(7));
        assert_eq!(samples, 3);
    }

    #[test]
    fn test_poll_times_out_after_budget() {
        let mut samples = 0;
        let result: Result<(), WaitError<()>> =
            Poll::new(1_000, 100).poll(&mut NoopDelay, &Never, || {
                samples += 1;
                Ok(None)
            });

        assert_eq!(result, Err(WaitError::TimedOut));
        assert_eq!(samples, Poll::new(1_000, 100).max_samples());
    }

    #[test]
    fn test_poll_passes_condition_errors_through() {
        let result: Result<(), WaitError<&str>> =
            Poll::new(1_000, 100).poll(&mut NoopDelay, &Never, || Err("bus"));

        assert_eq!(result, Err(WaitError::Failed("bus")));
    }

    #[test]
    fn test_poll_honours_cancellation() {
        let cancel = AtomicBool::new(true);
        let result: Result<(), WaitError<()>> =
            Poll::new(1_000, 100).poll(&mut NoopDelay, &cancel, || Ok(None));

        assert_eq!(result, Err(WaitError::Cancelled));
    }
}
