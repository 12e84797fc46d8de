//! Wake-on-radio scheduling
//!
//! In WORRX the chip sleeps on the low power oscillator, wakes every WAKEUPFREQ ticks and
//! listens for a short window. [`WakeScheduler`] programs the timer, arms the mode and, on
//! every [`WakeScheduler::poll`], turns a pending wakeup into either [`WorEvent::Quiet`] or
//! [`WorEvent::Activity`].

use embedded_hal::delay::DelayNs;

use crate::config::WakeupConfig;
use crate::device::{Device, RegisterPort};
use crate::error::Error;
use crate::planner::params::{wake_ticks, WakeTicks};
use crate::registers::{
    FifoCmd, FifoCount, Irq, IrqRequest, PowerMode, PwrMode, RadioStateRegister, Rssi, Wakeup,
    WakeupFreq, WakeupTimer, WakeupXoEarly,
};
use crate::wait::{Cancel, Poll, WaitError};

/// Where the duty cycle stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WakeState {
    /// Not duty cycling
    Awake,
    /// WORRX, waiting for the next wakeup
    ArmedSleep,
    /// Woken up, sampling the channel
    WorListening,
}

/// Outcome of one [`WakeScheduler::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WorEvent {
    /// No wakeup since the last poll
    Sleeping,
    /// Woke up, nothing heard during the listen window
    Quiet,
    /// Woke up and heard something; the receiver stays on
    Activity,
}

#[derive(Debug, Clone)]
pub struct WakeScheduler {
    state: WakeState,
}

impl Default for WakeScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl WakeScheduler {
    pub fn new() -> Self {
        Self {
            state: WakeState::Awake,
        }
    }

    pub fn state(&self) -> WakeState {
        self.state
    }

    /// Forgets the duty cycle without touching the device.
    pub(crate) fn reset(&mut self) {
        self.state = WakeState::Awake;
    }

    /// Programs the wake timer so the first wakeup comes one period from now.
    ///
    /// # Errors
    /// * [`Error::InvalidState`] - the duty cycle is running
    /// * [`ConfigurationError::WakeTimerMisconfigured`](crate::ConfigurationError::WakeTimerMisconfigured)
    ///   - nothing was written
    /// * [`Error::Port`] - bus communication failed
    pub fn set_wakeup_timer<P: RegisterPort>(
        &mut self,
        device: &mut Device<P>,
        wakeup: &WakeupConfig,
    ) -> Result<WakeTicks, Error<P::Error>> {
        if self.state != WakeState::Awake {
            return Err(Error::InvalidState);
        }
        let ticks = wake_ticks(wakeup)?;

        device.write_register(WakeupFreq {
            ticks: ticks.period,
        })?;
        device.write_register(WakeupXoEarly {
            ticks: ticks.xo_early,
        })?;
        let now = device.read_register::<WakeupTimer>()?.ticks;
        device.write_register(Wakeup {
            ticks: now.wrapping_add(ticks.period),
        })?;

        log::debug!(
            "ax::wor timer every {} ticks, first at {:#06x}",
            ticks.period,
            now.wrapping_add(ticks.period)
        );
        Ok(ticks)
    }

    /// Enters WORRX. The receive registers must already be loaded.
    pub fn arm<P: RegisterPort>(&mut self, device: &mut Device<P>) -> Result<(), Error<P::Error>> {
        if self.state != WakeState::Awake {
            return Err(Error::InvalidState);
        }
        device.write_register(PwrMode::new(PowerMode::WorRx))?;
        self.state = WakeState::ArmedSleep;
        Ok(())
    }

    /// Handles a pending wakeup, if any.
    ///
    /// Returns [`WorEvent::Sleeping`] at once when the wakeup interrupt is not pending.
    /// Otherwise the wakeup is acknowledged and the channel sampled every `interval_us` for
    /// `listen_bits` bit times. RSSI at or above the threshold, a receiver past preamble
    /// detection or data in the FIFO all count as activity.
    ///
    /// # Errors
    /// * [`Error::InvalidState`] - not armed
    /// * [`Error::Cancelled`] - `cancel` fired during the listen window; the chip was
    ///   powered down
    /// * [`Error::Port`] - bus communication failed
    pub fn poll<P, D, C>(
        &mut self,
        device: &mut Device<P>,
        delay: &mut D,
        cancel: &C,
        wakeup: &WakeupConfig,
        bitrate: u32,
        interval_us: u32,
    ) -> Result<WorEvent, Error<P::Error>>
    where
        P: RegisterPort,
        D: DelayNs + ?Sized,
        C: Cancel + ?Sized,
    {
        if self.state != WakeState::ArmedSleep {
            return Err(Error::InvalidState);
        }

        let pending = device.read_register::<IrqRequest>()?.pending;
        if !pending.contains(Irq::WAKEUP_TIMER) {
            return Ok(WorEvent::Sleeping);
        }
        // reading the timer acknowledges the interrupt
        let at = device.read_register::<WakeupTimer>()?.ticks;
        self.state = WakeState::WorListening;
        log::trace!("ax::wor woke at {:#06x}", at);

        let window_us = u64::from(wakeup.listen_bits) * 1_000_000 / u64::from(bitrate.max(1));
        let window = Poll::new(window_us.min(u64::from(u32::MAX)) as u32, interval_us);

        let heard: Result<i8, WaitError<Error<P::Error>>> = window.poll(delay, cancel, || {
            let rssi = device.read_register::<Rssi>()?.value;
            let receiving = device.read_register::<RadioStateRegister>()?.state.is_receiving();
            let queued = device.read_register::<FifoCount>()?.count > 0;
            Ok((rssi >= wakeup.rssi_threshold || receiving || queued).then_some(rssi))
        });

        match heard {
            Ok(rssi) => {
                log::debug!("ax::wor activity, rssi {}", rssi);
                self.state = WakeState::Awake;
                Ok(WorEvent::Activity)
            }
            Err(WaitError::TimedOut) => {
                self.state = WakeState::ArmedSleep;
                Ok(WorEvent::Quiet)
            }
            Err(WaitError::Cancelled) => {
                self.state = WakeState::Awake;
                let cleared = device.write_register(FifoCmd::ClearData);
                device.write_register(PwrMode::new(PowerMode::PowerDown))?;
                cleared?;
                Err(Error::Cancelled)
            }
            Err(WaitError::Failed(e)) => {
                self.state = WakeState::ArmedSleep;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::AtomicBool;

    use super::*;
    use crate::error::ConfigurationError;
    use crate::mock::{NoopDelay, SimRadio};
    use crate::registers::map;
    use crate::wait::Never;

    const BITRATE: u32 = 2000;

    fn armed(wakeups: &[bool]) -> (Device<SimRadio>, WakeScheduler) {
        let mut sim = SimRadio::new();
        sim.schedule_wakeups(wakeups);
        let mut device = Device::new(sim);
        let mut scheduler = WakeScheduler::new();
        scheduler
            .set_wakeup_timer(&mut device, &WakeupConfig::default())
            .unwrap();
        scheduler.arm(&mut device).unwrap();
        (device, scheduler)
    }

    fn poll(device: &mut Device<SimRadio>, scheduler: &mut WakeScheduler) -> WorEvent {
        scheduler
            .poll(device, &mut NoopDelay, &Never, &WakeupConfig::default(), BITRATE, 1_000)
            .unwrap()
    }

    #[test]
    fn test_timer_counts_from_now() {
        let mut sim = SimRadio::new();
        sim.set_wakeup_timer(0xFF00);
        let mut device = Device::new(sim);

        let ticks = WakeScheduler::new()
            .set_wakeup_timer(&mut device, &WakeupConfig::new(1000))
            .unwrap();

        assert_eq!(ticks.period, 640);
        assert_eq!(device.read_u16(map::WAKEUPFREQ).unwrap(), 640);
        assert_eq!(device.read_u16(map::WAKEUP).unwrap(), 0xFF00u16.wrapping_add(640));
    }

    #[test]
    fn test_unrepresentable_period_rejected() {
        let mut device = Device::new(SimRadio::new());
        let result =
            WakeScheduler::new().set_wakeup_timer(&mut device, &WakeupConfig::new(200_000));

        assert_eq!(
            result,
            Err(Error::Configuration(ConfigurationError::WakeTimerMisconfigured))
        );
        assert!(device.port().writes_to(map::WAKEUPFREQ).is_empty());
    }

    #[test]
    fn test_no_wakeup_does_not_block() {
        let (mut device, mut scheduler) = armed(&[]);
        assert_eq!(poll(&mut device, &mut scheduler), WorEvent::Sleeping);
        assert_eq!(scheduler.state(), WakeState::ArmedSleep);
    }

    #[test]
    fn test_quiet_channel_goes_back_to_sleep() {
        let (mut device, mut scheduler) = armed(&[false, false]);

        assert_eq!(poll(&mut device, &mut scheduler), WorEvent::Quiet);
        assert_eq!(scheduler.state(), WakeState::ArmedSleep);
        assert_eq!(poll(&mut device, &mut scheduler), WorEvent::Quiet);
        assert_eq!(poll(&mut device, &mut scheduler), WorEvent::Sleeping);
        assert_eq!(device.port().power_mode(), PowerMode::WorRx);
    }

    #[test]
    fn test_activity_wakes_up() {
        let (mut device, mut scheduler) = armed(&[false, true]);

        assert_eq!(poll(&mut device, &mut scheduler), WorEvent::Quiet);
        assert_eq!(poll(&mut device, &mut scheduler), WorEvent::Activity);
        assert_eq!(scheduler.state(), WakeState::Awake);
        assert_eq!(
            scheduler.poll(
                &mut device,
                &mut NoopDelay,
                &Never,
                &WakeupConfig::default(),
                BITRATE,
                1_000
            ),
            Err(Error::InvalidState)
        );
    }

    #[test]
    fn test_cancel_during_listen_powers_down() {
        let (mut device, mut scheduler) = armed(&[false]);
        let cancel = AtomicBool::new(true);

        let result = scheduler.poll(
            &mut device,
            &mut NoopDelay,
            &cancel,
            &WakeupConfig::default(),
            BITRATE,
            1_000,
        );

        assert_eq!(result, Err(Error::Cancelled));
        assert_eq!(scheduler.state(), WakeState::Awake);
        assert_eq!(device.port().power_mode(), PowerMode::PowerDown);
    }
}
