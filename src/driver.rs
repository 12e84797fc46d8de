//! Transceiver driver
//!
//! [`Transceiver`] owns the register port, the delay provider and a [`DeviceState`] that
//! tracks what the chip is doing. Every public operation checks the [`DeviceMode`] first and
//! fails with [`Error::InvalidState`] when it does not apply, before touching the bus.
//!
//! ```text
//!            init                tx_on                    tx_packet
//!   Off ───────────▶ Idle ───────────────────▶ FullTx ───────────────▶ SynthOn
//!                     │  rx_on                                           │
//!                     ├───────────▶ FullRx ◀─────────────────────────────┘ rx_on
//!                     │  rx_wake_on_radio        Activity
//!                     └───────────▶ WorSleep ─────────────▶ WorActive
//!                                        ◀─────────────────
//!                                      rearm_wake_on_radio
//! ```
//!
//! `off` and `force_off` lead back to `Off` from anywhere.
//!
//! # Example
//! ```no_run
//! use ax5043::config::{ModulationParameters, RadioConfig};
//! use ax5043::{InitStatus, SpiPort, Transceiver};
//! use ax5043::wait::Never;
//!
//! # fn demo<SPI, D>(spi: SPI, delay: D) -> Result<(), ax5043::Error<SPI::Error>>
//! # where SPI: embedded_hal::spi::SpiDevice, D: embedded_hal::delay::DelayNs {
//! let config = RadioConfig::default().with_frequency(435_000_000);
//! let mut radio = Transceiver::new(SpiPort::new(spi), delay, config, ModulationParameters::gmsk())?;
//!
//! if radio.init() != InitStatus::Ok {
//!     return Ok(());
//! }
//! radio.tx_on(&Never)?;
//! radio.tx_packet(b"hello", &Never)?;
//!
//! radio.rx_on()?;
//! if let Some(packet) = radio.rx_packet()? {
//!     // packet.data, packet.rssi, ...
//! }
//! # Ok(())
//! # }
//! ```

use embedded_hal::delay::DelayNs;

use crate::config::{
    BasebandParameters, Channel, ModulationParameters, PacketControllerParameters,
    PatternMatchParameters, PerformanceTuning, PinConfiguration, PllParameters, RadioConfig,
    TransmitPath, WakeupConfig,
};
use crate::device::{Device, RegisterPort};
use crate::error::{ConfigurationError, Error, InitStatus, WaitTarget};
use crate::packet::{EngineState, FrameFormat, Packet, PacketEngine};
use crate::planner::params::WakeTicks;
use crate::planner::{
    apply_rx, apply_shared, baseline_writes, plan_registers, PlanContext, RegisterPlan, Section,
};
use crate::registers::{
    BackgroundRssi, PowerMode, PwrMode, RadioState, RadioStateRegister, Rssi, Scratch,
    SiliconRevision,
};
use crate::synth::{Adjustment, RangingReport, SynthesizerCalibrator};
use crate::wait::{into_error, Cancel, Never, Poll};
use crate::wakeup::{WakeScheduler, WakeState, WorEvent};

/// Written to SCRATCH and read back while probing
const SCRATCH_PATTERN: u8 = 0x5A;

/// Sections a modulation change rewrites
const MODULATION_SECTIONS: [Section; 8] = [
    Section::Modulation,
    Section::Receiver,
    Section::ReceiverParameterSets,
    Section::Transmitter,
    Section::PacketFormat,
    Section::PatternMatch,
    Section::PacketController,
    Section::PerformanceTuning,
];

/// What the chip is doing, as far as the driver knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceMode {
    /// Not initialized, or powered down by `off`
    Off,
    /// Initialized and powered down
    Idle,
    /// Synthesizer still running, no transfer armed
    SynthOn,
    /// Transmitter armed
    FullTx,
    /// Receiver running
    FullRx,
    /// Duty cycling in WORRX
    WorSleep,
    /// A wakeup found activity; the receiver is running
    WorActive,
}

/// Everything the driver tracks about the chip.
#[derive(Debug, Clone)]
pub struct DeviceState {
    mode: DeviceMode,
    initialized: bool,
    engine: PacketEngine,
    wake: WakeScheduler,
    synth: SynthesizerCalibrator,
    config: RadioConfig,
    modulation: ModulationParameters,
    wakeup: Option<WakeupConfig>,
}

impl DeviceState {
    /// Wake settings to plan with: only while duty cycling.
    fn active_wakeup(&self) -> Option<&WakeupConfig> {
        match self.mode {
            DeviceMode::WorSleep | DeviceMode::WorActive => self.wakeup.as_ref(),
            _ => None,
        }
    }

    /// Back to a powered down chip with nothing armed.
    fn power_down(&mut self, mode: DeviceMode) {
        self.mode = mode;
        self.engine.reset();
        self.wake.reset();
    }
}

/// AX5043 driver.
pub struct Transceiver<P, D> {
    device: Device<P>,
    delay: D,
    state: DeviceState,
}

impl<P, D> Transceiver<P, D>
where
    P: RegisterPort,
    D: DelayNs,
{
    /// Creates a driver. Nothing is written until [`Self::init`].
    ///
    /// # Errors
    /// Any [`ConfigurationError`] the configuration or modulation would cause later.
    pub fn new(
        port: P,
        delay: D,
        config: RadioConfig,
        modulation: ModulationParameters,
    ) -> Result<Self, ConfigurationError> {
        PlanContext::new(&config, &modulation, None)?;
        baseline_writes(&config)?;
        let synth = SynthesizerCalibrator::new(&config)?;

        Ok(Self {
            device: Device::new(port),
            delay,
            state: DeviceState {
                mode: DeviceMode::Off,
                initialized: false,
                engine: PacketEngine::new(
                    &config,
                    FrameFormat::new(&modulation, &config.pattern_match),
                ),
                wake: WakeScheduler::new(),
                synth,
                config,
                modulation,
                wakeup: None,
            },
        })
    }

    /// Probes the chip, loads the baseline registers and ranges both synthesizers.
    ///
    /// Each step short-circuits on failure and the driver stays uninitialized. Nothing is
    /// transmitted.
    pub fn init(&mut self) -> InitStatus {
        self.state.initialized = false;
        self.state.power_down(DeviceMode::Off);

        if self.device.read_register::<Scratch>().is_err() {
            log::warn!("ax::init no response from SCRATCH");
            return InitStatus::PortFailed;
        }
        let probe = self
            .device
            .write_register(Scratch {
                value: SCRATCH_PATTERN,
            })
            .and_then(|()| self.device.read_register::<Scratch>());
        match probe {
            Ok(scratch) if scratch.value == SCRATCH_PATTERN => {}
            Ok(scratch) => {
                log::warn!("ax::init SCRATCH reads back {:#04x}", scratch.value);
                return InitStatus::BadScratch;
            }
            Err(_) => return InitStatus::PortFailed,
        }

        match self.device.read_register::<SiliconRevision>() {
            Ok(revision) if revision.value == SiliconRevision::AX5043 => {}
            Ok(revision) => {
                log::warn!("ax::init silicon revision {:#04x}", revision.value);
                return InitStatus::BadRevision;
            }
            Err(_) => return InitStatus::PortFailed,
        }

        if let Err(e) = self.write_baseline() {
            log::warn!("ax::init baseline failed: {}", e);
            return InitStatus::SetSpiFailed;
        }

        self.state.synth.invalidate();
        if let Err(e) = self
            .state
            .synth
            .do_vco_ranging(&mut self.device, &mut self.delay, &Never)
        {
            log::warn!("ax::init ranging failed: {}", e);
            return InitStatus::VcoRangingFailed;
        }

        log::debug!("ax::init done");
        self.state.initialized = true;
        self.state.mode = DeviceMode::Idle;
        InitStatus::Ok
    }

    fn write_baseline(&mut self) -> Result<(), Error<P::Error>> {
        self.device.write_register(PwrMode::reset())?;
        self.device
            .write_register(PwrMode::new(PowerMode::PowerDown))?;
        baseline_writes(&self.state.config)?.apply(&mut self.device)
    }

    fn require_initialized(&self) -> Result<(), Error<P::Error>> {
        if self.state.initialized {
            Ok(())
        } else {
            Err(Error::InvalidState)
        }
    }

    fn plan(&self, wakeup: Option<&WakeupConfig>) -> Result<RegisterPlan, Error<P::Error>> {
        Ok(plan_registers(
            &self.state.config,
            &self.state.modulation,
            wakeup,
            self.state.synth.state(),
        )?)
    }

    /// Waits for a transmission to end, clears the FIFO and powers down.
    pub fn off(&mut self) -> Result<(), Error<P::Error>> {
        let timeouts = self.state.config.timeouts;
        let device = &mut self.device;
        let idle = Poll::new(timeouts.tx_margin_us, timeouts.tx_poll_interval_us)
            .poll(&mut self.delay, &Never, || -> Result<_, Error<P::Error>> {
                let state = device.read_register::<RadioStateRegister>()?.state;
                Ok((!state.is_transmitting()).then_some(()))
            })
            .map_err(into_error::<P::Error>(WaitTarget::TxIdle));
        match idle {
            Err(Error::Hardware(e)) => log::warn!("ax::off transmitter still busy: {}", e),
            other => other?,
        }

        self.state.engine.fifo_clear(&mut self.device)?;
        self.device
            .write_register(PwrMode::new(PowerMode::PowerDown))?;
        self.state.power_down(DeviceMode::Off);
        Ok(())
    }

    /// Powers down without waiting. The driver state is reset even if the write fails.
    pub fn force_off(&mut self) -> Result<(), Error<P::Error>> {
        self.state.power_down(DeviceMode::Off);
        self.device.write_register(PwrMode::new(PowerMode::PowerDown))
    }

    /// Loads the transmit registers and starts the transmitter.
    ///
    /// # Errors
    /// * [`Error::InvalidState`] - not initialized, duty cycling, or a received frame is
    ///   half read
    /// * any error of [`PacketEngine::tx_on`]; after a timeout or cancel the chip is
    ///   powered down and the mode is [`DeviceMode::Idle`]
    pub fn tx_on<C: Cancel + ?Sized>(&mut self, cancel: &C) -> Result<(), Error<P::Error>> {
        self.require_initialized()?;
        if self.state.mode == DeviceMode::WorSleep {
            return Err(Error::InvalidState);
        }
        let plan = self.plan(None)?;

        let result = self.state.engine.tx_on(
            &mut self.device,
            &mut self.delay,
            cancel,
            &plan,
            self.state.synth.state(),
        );
        match result {
            Ok(()) => {
                self.state.wake.reset();
                self.state.mode = DeviceMode::FullTx;
            }
            // the engine powered the chip down before reporting these
            Err(Error::Hardware(_) | Error::Cancelled) => self.state.power_down(DeviceMode::Idle),
            Err(_) => {}
        }
        result
    }

    /// Loads the receive registers and starts the receiver.
    pub fn rx_on(&mut self) -> Result<(), Error<P::Error>> {
        self.require_initialized()?;
        if self.state.mode == DeviceMode::WorSleep {
            return Err(Error::InvalidState);
        }
        let plan = self.plan(None)?;

        self.state
            .engine
            .rx_on(&mut self.device, &plan, self.state.synth.state())?;
        self.state.wake.reset();
        self.state.mode = DeviceMode::FullRx;
        Ok(())
    }

    /// Sends one frame. See [`PacketEngine::tx_packet`].
    pub fn tx_packet<C: Cancel + ?Sized>(
        &mut self,
        payload: &[u8],
        cancel: &C,
    ) -> Result<(), Error<P::Error>> {
        if self.state.mode != DeviceMode::FullTx {
            return Err(Error::InvalidState);
        }
        let result =
            self.state
                .engine
                .tx_packet(&mut self.device, &mut self.delay, cancel, payload);
        self.settle(&result);
        result
    }

    /// Sends a raw beacon. See [`PacketEngine::tx_beacon`].
    pub fn tx_beacon<C: Cancel + ?Sized>(
        &mut self,
        payload: &[u8],
        cancel: &C,
    ) -> Result<(), Error<P::Error>> {
        if self.state.mode != DeviceMode::FullTx {
            return Err(Error::InvalidState);
        }
        let result =
            self.state
                .engine
                .tx_beacon(&mut self.device, &mut self.delay, cancel, payload);
        self.settle(&result);
        result
    }

    /// Sends 1000 zero bits. See [`PacketEngine::tx_1k_zeros`].
    pub fn tx_1k_zeros<C: Cancel + ?Sized>(&mut self, cancel: &C) -> Result<(), Error<P::Error>> {
        if self.state.mode != DeviceMode::FullTx {
            return Err(Error::InvalidState);
        }
        let result = self
            .state
            .engine
            .tx_1k_zeros(&mut self.device, &mut self.delay, cancel);
        self.settle(&result);
        result
    }

    /// Returns the next received frame, if complete. See [`PacketEngine::rx_packet`].
    pub fn rx_packet(&mut self) -> Result<Option<Packet>, Error<P::Error>> {
        match self.state.mode {
            DeviceMode::FullRx | DeviceMode::WorActive => {
                self.state.engine.rx_packet(&mut self.device)
            }
            _ => Err(Error::InvalidState),
        }
    }

    /// Updates the mode after a transmit operation of the engine.
    fn settle<T>(&mut self, result: &Result<T, Error<P::Error>>) {
        if matches!(result, Err(Error::Cancelled)) {
            self.state.power_down(DeviceMode::Idle);
            return;
        }
        if self.state.engine.state() == EngineState::Idle
            && matches!(self.state.mode, DeviceMode::FullTx | DeviceMode::FullRx)
        {
            self.state.mode = DeviceMode::SynthOn;
        }
    }

    /// Drops the FIFO contents. The chip stays in its power mode.
    pub fn fifo_clear(&mut self) -> Result<(), Error<P::Error>> {
        self.state.engine.fifo_clear(&mut self.device)?;
        if matches!(
            self.state.mode,
            DeviceMode::FullTx | DeviceMode::FullRx | DeviceMode::WorActive
        ) {
            self.state.mode = DeviceMode::SynthOn;
        }
        Ok(())
    }

    /// Commits whatever was written to the FIFO so far.
    pub fn fifo_commit(&mut self) -> Result<(), Error<P::Error>> {
        self.state.engine.fifo_commit(&mut self.device)
    }

    /// Programs the wake timer and remembers `wakeup` for the next arming.
    ///
    /// # Errors
    /// * [`Error::InvalidState`] - not initialized, or already duty cycling
    /// * [`ConfigurationError::WakeTimerMisconfigured`]
    pub fn set_wakeup_timer(&mut self, wakeup: WakeupConfig) -> Result<WakeTicks, Error<P::Error>> {
        self.require_initialized()?;
        let ticks = self.state.wake.set_wakeup_timer(&mut self.device, &wakeup)?;
        self.state.wakeup = Some(wakeup);
        Ok(ticks)
    }

    /// Starts duty-cycled reception.
    ///
    /// Loads the receive registers planned with `wakeup` (listen window, RSSI threshold,
    /// low power oscillator), clears the FIFO, programs the wake timer and enters WORRX.
    ///
    /// # Errors
    /// * [`Error::InvalidState`] - not initialized, already duty cycling, or synthesizer B
    ///   is not ranged
    /// * [`ConfigurationError::WakeTimerMisconfigured`] - nothing was written
    pub fn rx_wake_on_radio(&mut self, wakeup: WakeupConfig) -> Result<(), Error<P::Error>> {
        self.require_initialized()?;
        if matches!(
            self.state.mode,
            DeviceMode::WorSleep | DeviceMode::WorActive
        ) || !self.state.synth.state().b.is_locked()
        {
            return Err(Error::InvalidState);
        }
        let plan = self.plan(Some(&wakeup))?;

        apply_shared(&mut self.device, &plan)?;
        apply_rx(&mut self.device, &plan)?;
        self.state.engine.fifo_clear(&mut self.device)?;
        self.state.wake.reset();
        self.state.wake.set_wakeup_timer(&mut self.device, &wakeup)?;
        self.state.wake.arm(&mut self.device)?;

        self.state.wakeup = Some(wakeup);
        self.state.mode = DeviceMode::WorSleep;
        log::debug!("ax::wor armed, period {} ms", wakeup.period_ms);
        Ok(())
    }

    /// Handles a pending wakeup. On [`WorEvent::Activity`] the receiver stays on and
    /// [`Self::rx_packet`] picks up the frame.
    pub fn poll_wake_on_radio<C: Cancel + ?Sized>(
        &mut self,
        cancel: &C,
    ) -> Result<WorEvent, Error<P::Error>> {
        if self.state.mode != DeviceMode::WorSleep {
            return Err(Error::InvalidState);
        }
        let wakeup = self.state.wakeup.ok_or(Error::InvalidState)?;

        let event = self.state.wake.poll(
            &mut self.device,
            &mut self.delay,
            cancel,
            &wakeup,
            self.state.modulation.bitrate,
            self.state.config.timeouts.tx_poll_interval_us,
        );
        match event {
            Ok(WorEvent::Activity) => {
                self.state.engine.listen();
                self.state.mode = DeviceMode::WorActive;
            }
            Err(Error::Cancelled) => self.state.power_down(DeviceMode::Idle),
            _ => {}
        }
        event
    }

    /// Goes back to sleep after activity, keeping the loaded registers.
    pub fn rearm_wake_on_radio(&mut self) -> Result<(), Error<P::Error>> {
        if self.state.mode != DeviceMode::WorActive {
            return Err(Error::InvalidState);
        }
        self.state.engine.fifo_clear(&mut self.device)?;
        self.state.wake.arm(&mut self.device)?;
        self.state.mode = DeviceMode::WorSleep;
        Ok(())
    }

    /// Sweeps both synthesizers again. Leaves the chip powered down.
    pub fn do_vco_ranging<C: Cancel + ?Sized>(
        &mut self,
        cancel: &C,
    ) -> Result<RangingReport, Error<P::Error>> {
        self.require_initialized()?;
        let result = self
            .state
            .synth
            .do_vco_ranging(&mut self.device, &mut self.delay, cancel);
        self.state.power_down(DeviceMode::Idle);
        result
    }

    /// Moves the transmit synthesizer by `offset_hz`.
    pub fn adjust_frequency_a<C: Cancel + ?Sized>(
        &mut self,
        offset_hz: i32,
        cancel: &C,
    ) -> Result<Adjustment, Error<P::Error>> {
        self.adjust_frequency(Channel::A, offset_hz, cancel)
    }

    /// Moves the receive synthesizer by `offset_hz`.
    pub fn adjust_frequency_b<C: Cancel + ?Sized>(
        &mut self,
        offset_hz: i32,
        cancel: &C,
    ) -> Result<Adjustment, Error<P::Error>> {
        self.adjust_frequency(Channel::B, offset_hz, cancel)
    }

    /// Moves `channel` by `offset_hz`. When the move forces a new sweep, the mode the chip
    /// was in is entered again afterwards.
    ///
    /// # Errors
    /// Any error of [`SynthesizerCalibrator::adjust_frequency`], or of re-entering the
    /// previous mode.
    pub fn adjust_frequency<C: Cancel + ?Sized>(
        &mut self,
        channel: Channel,
        offset_hz: i32,
        cancel: &C,
    ) -> Result<Adjustment, Error<P::Error>> {
        self.require_initialized()?;
        let previous = self.state.mode;

        let adjustment = self
            .state
            .synth
            .adjust_frequency(&mut self.device, &mut self.delay, cancel, channel, offset_hz)
            .inspect_err(|e| {
                // both leave the chip in POWERDOWN; port failures leave it unknown
                if matches!(e, Error::Hardware(_) | Error::Cancelled) {
                    self.state.power_down(DeviceMode::Idle);
                }
            })?;

        if let Adjustment::Reranged(_) = adjustment {
            self.state.power_down(DeviceMode::Idle);
            self.restore(previous, cancel)?;
        }
        Ok(adjustment)
    }

    /// Re-enters `mode` after a sweep powered the chip down.
    fn restore<C: Cancel + ?Sized>(
        &mut self,
        mode: DeviceMode,
        cancel: &C,
    ) -> Result<(), Error<P::Error>> {
        log::debug!("ax::synth restoring {:?}", mode);
        match mode {
            DeviceMode::FullTx => self.tx_on(cancel),
            DeviceMode::FullRx => self.rx_on(),
            DeviceMode::WorSleep | DeviceMode::WorActive => match self.state.wakeup {
                Some(wakeup) => self.rx_wake_on_radio(wakeup),
                None => Ok(()),
            },
            DeviceMode::Off | DeviceMode::Idle | DeviceMode::SynthOn => Ok(()),
        }
    }

    /// Moves the transmit synthesizer without any check. See
    /// [`SynthesizerCalibrator::force_quick_adjust_frequency`].
    pub fn force_quick_adjust_frequency_a(&mut self, offset_hz: i32) -> Result<u32, Error<P::Error>> {
        self.state
            .synth
            .force_quick_adjust_frequency(&mut self.device, Channel::A, offset_hz)
    }

    /// Moves the receive synthesizer without any check.
    pub fn force_quick_adjust_frequency_b(&mut self, offset_hz: i32) -> Result<u32, Error<P::Error>> {
        self.state
            .synth
            .force_quick_adjust_frequency(&mut self.device, Channel::B, offset_hz)
    }

    /// Routes the chip to synthesizer `channel`.
    pub fn select_synthesizer(&mut self, channel: Channel) -> Result<(), Error<P::Error>> {
        self.state.synth.select_synthesizer(&mut self.device, channel)
    }

    /// Validates the new parameters, writes `sections` and keeps them.
    fn update(
        &mut self,
        config: RadioConfig,
        modulation: ModulationParameters,
        sections: &[Section],
    ) -> Result<(), Error<P::Error>> {
        let context = PlanContext::new(&config, &modulation, self.state.active_wakeup())?;
        for &section in sections {
            context.section(section).apply(&mut self.device)?;
        }

        self.state.config = config;
        self.state.modulation = modulation;
        self.state
            .engine
            .set_format(FrameFormat::new(&modulation, &config.pattern_match));
        self.state.engine.set_store_flags(config.store_flags);
        Ok(())
    }

    /// Switches modulation and framing. Takes effect on the next transfer.
    pub fn set_modulation_parameters(
        &mut self,
        modulation: ModulationParameters,
    ) -> Result<(), Error<P::Error>> {
        self.update(self.state.config, modulation, &MODULATION_SECTIONS)
    }

    /// Rewrites the baseband group.
    pub fn set_baseband_parameters(
        &mut self,
        baseband: BasebandParameters,
    ) -> Result<(), Error<P::Error>> {
        let config = RadioConfig {
            baseband,
            ..self.state.config
        };
        self.update(config, self.state.modulation, &[Section::Baseband])
    }

    /// Rewrites the PLL group. VCO ranges are kept.
    pub fn set_pll_parameters(&mut self, pll: PllParameters) -> Result<(), Error<P::Error>> {
        let config = RadioConfig {
            pll,
            ..self.state.config
        };
        self.update(config, self.state.modulation, &[Section::Pll])
    }

    /// Rewrites the tuning registers.
    pub fn set_performance_tuning(
        &mut self,
        tuning: PerformanceTuning,
    ) -> Result<(), Error<P::Error>> {
        let config = RadioConfig {
            tuning,
            ..self.state.config
        };
        self.update(config, self.state.modulation, &[Section::PerformanceTuning])
    }

    /// Rewrites the pin functions.
    pub fn set_pin_configuration(&mut self, pins: PinConfiguration) -> Result<(), Error<P::Error>> {
        let config = RadioConfig {
            pins,
            ..self.state.config
        };
        self.update(config, self.state.modulation, &[Section::Pins])
    }

    /// Rewrites the sync word and match thresholds.
    pub fn set_pattern_match_parameters(
        &mut self,
        pattern_match: PatternMatchParameters,
    ) -> Result<(), Error<P::Error>> {
        let config = RadioConfig {
            pattern_match,
            ..self.state.config
        };
        self.update(config, self.state.modulation, &[Section::PatternMatch])
    }

    /// Rewrites the packet controller timing and limits.
    pub fn set_packet_controller_parameters(
        &mut self,
        packet_controller: PacketControllerParameters,
    ) -> Result<(), Error<P::Error>> {
        let config = RadioConfig {
            packet_controller,
            ..self.state.config
        };
        self.update(config, self.state.modulation, &[Section::PacketController])
    }

    /// Sets the output power as a fraction of full power.
    ///
    /// # Errors
    /// * [`ConfigurationError::PowerOutOfRange`] - `power` is outside 0.0..=1.0; nothing
    ///   was written
    pub fn set_transmit_power(&mut self, power: f32) -> Result<(), Error<P::Error>> {
        let modulation = ModulationParameters {
            power,
            ..self.state.modulation
        };
        self.update(self.state.config, modulation, &[Section::Transmitter])
    }

    /// Switches between single ended and differential output. Takes effect immediately.
    pub fn set_transmit_path(&mut self, transmit_path: TransmitPath) -> Result<(), Error<P::Error>> {
        let config = RadioConfig {
            transmit_path,
            ..self.state.config
        };
        self.update(config, self.state.modulation, &[Section::Transmitter])
    }

    /// SILICONREVISION, 0x51 on an AX5043.
    pub fn silicon_revision(&mut self) -> Result<u8, Error<P::Error>> {
        Ok(self.device.read_register::<SiliconRevision>()?.value)
    }

    /// Current SCRATCH value.
    pub fn scratch(&mut self) -> Result<u8, Error<P::Error>> {
        Ok(self.device.read_register::<Scratch>()?.value)
    }

    /// Current RSSI in dB.
    pub fn rssi(&mut self) -> Result<i8, Error<P::Error>> {
        Ok(self.device.read_register::<Rssi>()?.value)
    }

    /// Background noise estimate, raw BGNDRSSI.
    pub fn background_rssi(&mut self) -> Result<u8, Error<P::Error>> {
        Ok(self.device.read_register::<BackgroundRssi>()?.value)
    }

    /// State of the radio controller.
    pub fn radio_state(&mut self) -> Result<RadioState, Error<P::Error>> {
        Ok(self.device.read_register::<RadioStateRegister>()?.state)
    }

    /// Mode the driver believes the chip is in.
    pub fn mode(&self) -> DeviceMode {
        self.state.mode
    }

    /// State of the packet engine.
    pub fn engine_state(&self) -> EngineState {
        self.state.engine.state()
    }

    /// State of the wake scheduler.
    pub fn wake_state(&self) -> WakeState {
        self.state.wake.state()
    }

    /// VCO ranges of synthesizers A and B, `None` where no sweep succeeded.
    pub fn vco_ranges(&self) -> (Option<u8>, Option<u8>) {
        let synth = self.state.synth.state();
        (synth.a.vco_range, synth.b.vco_range)
    }

    /// Board configuration in use.
    pub fn config(&self) -> &RadioConfig {
        &self.state.config
    }

    /// Modulation in use.
    pub fn modulation(&self) -> &ModulationParameters {
        &self.state.modulation
    }

    /// Borrows the register access layer.
    pub fn device(&self) -> &Device<P> {
        &self.device
    }

    /// Borrows the register access layer mutably. Writes made through it bypass the mode
    /// tracking.
    pub fn device_mut(&mut self) -> &mut Device<P> {
        &mut self.device
    }

    /// Gives back the port and the delay provider.
    pub fn release(self) -> (P, D) {
        (self.device.release(), self.delay)
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::AtomicBool;

    use super::*;
    use crate::error::HardwareError;
    use crate::mock::{NoopDelay, SimRadio};
    use crate::registers::map;

    type Radio = Transceiver<SimRadio, NoopDelay>;

    fn radio_with(sim: SimRadio, modulation: ModulationParameters) -> Radio {
        Transceiver::new(sim, NoopDelay, RadioConfig::default(), modulation).unwrap()
    }

    fn ready() -> Radio {
        let mut radio = radio_with(SimRadio::new(), ModulationParameters::gmsk());
        assert_eq!(radio.init(), InitStatus::Ok);
        radio
    }

    fn sim(radio: &Radio) -> &SimRadio {
        radio.device().port()
    }

    #[test]
    fn test_init_probes_and_ranges() {
        let radio = ready();

        assert_eq!(radio.mode(), DeviceMode::Idle);
        assert_eq!(radio.vco_ranges(), (Some(8), Some(8)));
        assert_eq!(sim(&radio).writes_to(map::SCRATCH), vec![SCRATCH_PATTERN]);
        assert_eq!(sim(&radio).power_mode(), PowerMode::PowerDown);
    }

    #[test]
    fn test_bad_scratch_stops_before_configuration() {
        let mut radio = radio_with(SimRadio::new().with_scratch_fault(), ModulationParameters::gmsk());

        assert_eq!(radio.init(), InitStatus::BadScratch);
        assert_eq!(radio.mode(), DeviceMode::Off);
        assert!(sim(&radio).writes_to(map::PWRMODE).is_empty());
        assert!(sim(&radio).writes_to(map::PLLRANGINGA).is_empty());
        assert!(sim(&radio).writes_to(map::MODULATION).is_empty());
        assert_eq!(radio.tx_on(&Never), Err(Error::InvalidState));
    }

    #[test]
    fn test_init_failure_statuses() {
        let mut radio = radio_with(SimRadio::new().with_revision(0x42), ModulationParameters::gmsk());
        assert_eq!(radio.init(), InitStatus::BadRevision);

        let mut failing = SimRadio::new();
        failing.fail_all(true);
        let mut radio = radio_with(failing, ModulationParameters::gmsk());
        assert_eq!(radio.init(), InitStatus::PortFailed);

        let mut failing = SimRadio::new();
        failing.fail_writes_at(Some(map::tuning::XTALOSC));
        let mut radio = radio_with(failing, ModulationParameters::gmsk());
        assert_eq!(radio.init(), InitStatus::SetSpiFailed);

        let mut radio = radio_with(
            SimRadio::new().with_lock_range(Channel::A, None),
            ModulationParameters::gmsk(),
        );
        assert_eq!(radio.init(), InitStatus::VcoRangingFailed);
        assert_eq!(radio.rx_on(), Err(Error::InvalidState));
    }

    #[test]
    fn test_invalid_configuration_rejected_up_front() {
        let modulation = ModulationParameters {
            power: 2.0,
            ..ModulationParameters::gmsk()
        };
        let result = Transceiver::new(
            SimRadio::new(),
            NoopDelay,
            RadioConfig::default(),
            modulation,
        );
        assert!(matches!(result, Err(ConfigurationError::PowerOutOfRange)));
    }

    #[test]
    fn test_loopback_through_the_driver() {
        let mut radio = ready();

        radio.tx_on(&Never).unwrap();
        assert_eq!(radio.mode(), DeviceMode::FullTx);
        radio.tx_packet(b"ping", &Never).unwrap();
        assert_eq!(radio.mode(), DeviceMode::SynthOn);
        assert_eq!(radio.tx_packet(b"again", &Never), Err(Error::InvalidState));

        radio.rx_on().unwrap();
        assert_eq!(radio.mode(), DeviceMode::FullRx);
        let packet = radio.rx_packet().unwrap().unwrap();
        assert_eq!(&packet.data[..], b"ping");
    }

    #[test]
    fn test_transmit_refused_while_receiving() {
        let mut radio = ready();
        radio.rx_on().unwrap();
        radio.device_mut().port_mut().inject_frame(b"\x06queue");

        assert_eq!(radio.tx_packet(b"nope", &Never), Err(Error::InvalidState));
        let packet = radio.rx_packet().unwrap().unwrap();
        assert_eq!(&packet.data[..], b"queue");
    }

    #[test]
    fn test_wake_on_radio_cycle() {
        let mut radio = ready();
        radio
            .device_mut()
            .port_mut()
            .schedule_wakeups(&[false, false, true]);
        radio.device_mut().port_mut().inject_frame(b"\x03hi");

        radio.rx_wake_on_radio(WakeupConfig::default()).unwrap();
        assert_eq!(radio.mode(), DeviceMode::WorSleep);
        assert_eq!(sim(&radio).power_mode(), PowerMode::WorRx);

        assert_eq!(radio.poll_wake_on_radio(&Never), Ok(WorEvent::Quiet));
        assert_eq!(radio.poll_wake_on_radio(&Never), Ok(WorEvent::Quiet));
        assert_eq!(radio.engine_state(), EngineState::Idle);
        assert_eq!(radio.wake_state(), WakeState::ArmedSleep);

        assert_eq!(radio.poll_wake_on_radio(&Never), Ok(WorEvent::Activity));
        assert_eq!(radio.mode(), DeviceMode::WorActive);
        assert_eq!(radio.engine_state(), EngineState::RxArmed);
        let packet = radio.rx_packet().unwrap().unwrap();
        assert_eq!(&packet.data[..], b"hi");

        radio.rearm_wake_on_radio().unwrap();
        assert_eq!(radio.mode(), DeviceMode::WorSleep);
        assert_eq!(radio.poll_wake_on_radio(&Never), Ok(WorEvent::Sleeping));
        assert_eq!(radio.tx_on(&Never), Err(Error::InvalidState));
    }

    #[test]
    fn test_fifo_clear_then_restart() {
        let mut radio = ready();
        radio.rx_on().unwrap();
        radio
            .device_mut()
            .port_mut()
            .push_rx_bytes(&[0xE1, 0x03, 0x01, 9, b'x']);
        assert_eq!(radio.rx_packet(), Ok(None));
        assert_eq!(radio.engine_state(), EngineState::RxDataPending);
        assert_eq!(radio.tx_on(&Never), Err(Error::InvalidState));

        radio.fifo_clear().unwrap();
        assert_eq!(radio.engine_state(), EngineState::Idle);
        radio.tx_on(&Never).unwrap();
        radio.fifo_clear().unwrap();
        radio.rx_on().unwrap();
        assert_eq!(radio.engine_state(), EngineState::RxArmed);
    }

    #[test]
    fn test_reranging_restores_receiver() {
        let mut radio = ready();
        radio.rx_on().unwrap();

        let adjustment = radio.adjust_frequency_b(3_000_000, &Never).unwrap();

        assert!(matches!(adjustment, Adjustment::Reranged(_)));
        assert_eq!(radio.mode(), DeviceMode::FullRx);
        assert_eq!(sim(&radio).power_mode(), PowerMode::FullRx);
    }

    #[test]
    fn test_cancelled_adjust_while_transmitting_powers_down() {
        let mut radio = ready();
        radio.tx_on(&Never).unwrap();
        radio.device_mut().port_mut().stall_tx(true);
        radio
            .device_mut()
            .write_fifo(&[0xE1, 0x03, 0x03, b'o', b'k'])
            .unwrap();
        radio.fifo_commit().unwrap();
        assert_eq!(radio.radio_state(), Ok(RadioState::Tx));

        let result = radio.adjust_frequency_a(100, &AtomicBool::new(true));

        assert_eq!(result, Err(Error::Cancelled));
        assert_eq!(radio.mode(), DeviceMode::Idle);
        assert_eq!(sim(&radio).power_mode(), PowerMode::PowerDown);
        assert!(!radio.radio_state().unwrap().is_transmitting());
    }

    #[test]
    fn test_oscillator_timeout_on_tx_on_powers_down() {
        let mut radio = ready();
        radio.rx_on().unwrap();
        radio.device_mut().port_mut().halt_crystal(true);

        assert_eq!(
            radio.tx_on(&Never),
            Err(Error::Hardware(HardwareError::Timeout(WaitTarget::Oscillator)))
        );
        assert_eq!(radio.mode(), DeviceMode::Idle);
        assert_eq!(radio.engine_state(), EngineState::Idle);
        assert_eq!(sim(&radio).power_mode(), PowerMode::PowerDown);

        radio.device_mut().port_mut().halt_crystal(false);
        radio.tx_on(&Never).unwrap();
        assert_eq!(radio.mode(), DeviceMode::FullTx);
    }

    #[test]
    fn test_transmit_path_switch_rewrites_modcfga() {
        let mut radio = ready();

        radio.set_transmit_path(TransmitPath::Differential).unwrap();
        assert_eq!(sim(&radio).register(map::MODCFGA) & 0x03, 0x01);
        assert_eq!(radio.config().transmit_path, TransmitPath::Differential);

        radio.set_transmit_path(TransmitPath::SingleEnded).unwrap();
        assert_eq!(sim(&radio).register(map::MODCFGA) & 0x03, 0x02);
    }

    #[test]
    fn test_stalled_transmit_leaves_synthesizer_on() {
        let mut radio = ready();
        radio.tx_on(&Never).unwrap();
        radio.device_mut().port_mut().stall_tx(true);

        assert_eq!(
            radio.tx_packet(b"stuck", &Never),
            Err(Error::Hardware(HardwareError::TxTimeout))
        );
        assert_eq!(radio.mode(), DeviceMode::SynthOn);
        assert_eq!(radio.engine_state(), EngineState::Idle);
    }

    #[test]
    fn test_off_and_force_off() {
        let mut radio = ready();
        radio.tx_on(&Never).unwrap();
        radio.off().unwrap();
        assert_eq!(radio.mode(), DeviceMode::Off);
        assert_eq!(sim(&radio).power_mode(), PowerMode::PowerDown);

        radio.rx_on().unwrap();
        radio.device_mut().port_mut().fail_all(true);
        assert!(radio.force_off().is_err());
        assert_eq!(radio.mode(), DeviceMode::Off);
        assert_eq!(radio.engine_state(), EngineState::Idle);
    }

    #[test]
    fn test_setters_validate_before_writing() {
        let mut radio = ready();
        let before = sim(&radio).writes_to(map::TXPWRCOEFFB).len();

        assert_eq!(
            radio.set_transmit_power(1.5),
            Err(Error::Configuration(ConfigurationError::PowerOutOfRange))
        );
        assert_eq!(sim(&radio).writes_to(map::TXPWRCOEFFB).len(), before);

        radio.set_transmit_power(0.5).unwrap();
        assert!(sim(&radio).writes_to(map::TXPWRCOEFFB).len() > before);
        assert_eq!(radio.modulation().power, 0.5);
    }

    #[test]
    fn test_modulation_change_switches_framing() {
        let mut radio = ready();
        radio
            .set_modulation_parameters(ModulationParameters::gfsk_hdlc())
            .unwrap();
        assert_eq!(
            sim(&radio).register(map::FRAMING),
            ModulationParameters::gfsk_hdlc().framing_byte()
        );

        radio.tx_on(&Never).unwrap();
        radio.tx_packet(b"hdlc", &Never).unwrap();
        assert!(sim(&radio).sync_words().is_empty());
        assert_eq!(sim(&radio).transmitted(), &[b"hdlc".to_vec()]);
    }
}
