//! Analog-Digital Converter (ADC)
//!
//! Driver for the 10-bit SAR converter, built around its auto-sample mode:
//! the hardware sequences one or more acquisitions into its result FIFO and
//! raises the conversion-complete interrupt; the driver drains the FIFO,
//! applies offset calibration and optional multi-sample averaging, and
//! signals the caller through a [`CompletionFlag`]. Manual (non-auto-sample)
//! acquisition is not supported.
//!
//! ## Usage
//!
//! ```no_run
//! use fugit::HertzU32;
//! use pic32mx_adc::adc::{Adc, CompletionFlag, Input, ResultSlot};
//! use pic32mx_adc::regs::ADC1;
//!
//! static DONE: CompletionFlag = CompletionFlag::new();
//! static RESULTS: [ResultSlot; 4] = [ResultSlot::INIT; 4];
//!
//! struct BusyWait;
//! impl embedded_hal::delay::DelayNs for BusyWait {
//!     fn delay_ns(&mut self, _ns: u32) {}
//! }
//! let mut delay = BusyWait;
//!
//! let mut adc = Adc::new(ADC1::take().unwrap(), &mut delay);
//! adc.configure_sample_rate(
//!     HertzU32::from_raw(200_000),
//!     HertzU32::from_raw(40_000_000),
//!     &mut delay,
//! )
//! .unwrap();
//!
//! // Four back-to-back conversions of AN3.
//! adc.convert(Input::An3, 4, &RESULTS, &DONE).unwrap();
//! while !DONE.is_done() {
//!     // The caller chooses how to wait; the driver never blocks.
//! }
//! let first = RESULTS[0].get();
//! ```
//!
//! ## Interrupt wiring
//!
//! [`Adc::on_interrupt`] must be called from the AD1 conversion-complete
//! vector, and [`Adc::poll`] from the main loop. Both take `&mut self`, so
//! an `Adc` shared with the interrupt handler is typically kept in a
//! `critical_section::Mutex<RefCell<Option<Adc<ADC1>>>>`; the driver
//! additionally wraps every read-modify-write of its shared control state in
//! a critical section of its own, so request calls made while the handler
//! can preempt them stay consistent.

use core::sync::atomic::{AtomicU16, AtomicU8, Ordering};

use embedded_hal::delay::DelayNs;
use fugit::HertzU32;

pub mod device;
pub mod sample_rate;

mod conversion;

pub use device::{AdcDevice, Port};
pub use sample_rate::{SampleTiming, CONV_TIME_TAD, SAMPLE_RATE_MAX, TAD_FREQ_MAX};

pub use crate::regs::FIFO_DEPTH;

/// Conversions in a calibration burst.
pub const CAL_BURST_LEN: usize = 10;

/// Stabilisation time after enabling the converter, in nanoseconds.
pub const BOOT_TIME_NS: u32 = 2_000;

// AD1CON1.SSRC: internal counter ends sampling and starts conversion.
const TRIG_AUTO: u8 = 0b111;
// AD1CON1.FORM: unsigned 16-bit integer.
const FORMAT_U16: u8 = 0;

/// Errors returned by ADC operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// No converter exists at the requested port index.
    NotFound,
    /// Unusable caller storage: the destination is too small for the active
    /// channel count, the scan mask is empty, or averaging parameters are
    /// out of range.
    Fail,
    /// The requested sample rate exceeds the absolute ceiling, or cannot be
    /// reached within the divider and sample-time ranges.
    TooLarge,
    /// The conversion clock is not derived from the peripheral bus clock.
    Invalid,
    /// A request arrived while the converter was not idle.
    Busy,
}

/// Driver states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// Accepting requests.
    Idle,
    /// Rate reconfiguration in progress; requests are rejected.
    Configuring,
    /// A conversion or scan is armed, awaiting hardware completion.
    Busy,
    /// A calibration burst is in progress.
    Calibrating,
    /// The driver observed an inconsistent control block and disabled the
    /// converter. Only [`Adc::reinitialize`] leaves this state.
    Error,
}

/// Completion states of a conversion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ConversionStatus {
    /// The request is in flight.
    Busy = 0,
    /// Results have been delivered to the destination.
    Done = 1,
}

/// A caller-owned completion signal, shared with the interrupt handler.
///
/// A fresh flag reads [`ConversionStatus::Done`]; accepting a request moves
/// it to `Busy`, and delivery of the final results moves it back to `Done`.
pub struct CompletionFlag(AtomicU8);

impl CompletionFlag {
    /// Creates a flag in the `Done` state.
    pub const fn new() -> Self {
        CompletionFlag(AtomicU8::new(ConversionStatus::Done as u8))
    }

    /// The current completion state.
    pub fn status(&self) -> ConversionStatus {
        match self.0.load(Ordering::Acquire) {
            0 => ConversionStatus::Busy,
            _ => ConversionStatus::Done,
        }
    }

    /// Whether the last accepted request has delivered its results.
    pub fn is_done(&self) -> bool {
        self.status() == ConversionStatus::Done
    }

    pub(crate) fn set(&self, status: ConversionStatus) {
        self.0.store(status as u8, Ordering::Release);
    }
}

impl Default for CompletionFlag {
    fn default() -> Self {
        CompletionFlag::new()
    }
}

/// One caller-owned result cell, shared with the interrupt handler.
///
/// Destinations are arrays of slots; `[ResultSlot::INIT; N]` gives a static
/// initializer.
#[repr(transparent)]
pub struct ResultSlot(AtomicU16);

impl ResultSlot {
    /// An empty slot, usable in `static` array initializers.
    pub const INIT: ResultSlot = ResultSlot::new();

    /// Creates an empty slot.
    pub const fn new() -> Self {
        ResultSlot(AtomicU16::new(0))
    }

    /// Reads the slot.
    pub fn get(&self) -> u16 {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn set(&self, value: u16) {
        self.0.store(value, Ordering::Release);
    }
}

impl Default for ResultSlot {
    fn default() -> Self {
        ResultSlot::new()
    }
}

/// Analog inputs selectable for single-channel conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Input {
    An0 = 0,
    An1 = 1,
    An2 = 2,
    An3 = 3,
    An4 = 4,
    An5 = 5,
    An6 = 6,
    An7 = 7,
    An8 = 8,
    An9 = 9,
    An10 = 10,
    An11 = 11,
    An12 = 12,
    An13 = 13,
    An14 = 14,
    An15 = 15,
}

impl Input {
    /// The low reference voltage, multiplexed on the AN0 selection code.
    pub const VREF_LOW: Input = Input::An0;
    /// The CTMU temperature diode, multiplexed on AN13.
    pub const CTMU_TEMP: Input = Input::An13;
    /// The internal voltage reference, multiplexed on AN14.
    pub const IVREF: Input = Input::An14;
    /// No input connected, multiplexed on AN15.
    pub const OPEN: Input = Input::An15;
}

macro_rules! scan_input {
    ($name:ident, $bit:expr) => {
        #[doc = concat!("Channel AN", stringify!($bit), ".")]
        pub const $name: ScanInputs = ScanInputs(1 << $bit);
    };
}

/// A set of analog channels, one bit per channel.
///
/// Used both for the scan-mode selection and for the analog-enable matrix of
/// the physical pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScanInputs(u16);

impl ScanInputs {
    scan_input!(AN0, 0);
    scan_input!(AN1, 1);
    scan_input!(AN2, 2);
    scan_input!(AN3, 3);
    scan_input!(AN4, 4);
    scan_input!(AN5, 5);
    scan_input!(AN6, 6);
    scan_input!(AN7, 7);
    scan_input!(AN8, 8);
    scan_input!(AN9, 9);
    scan_input!(AN10, 10);
    scan_input!(AN11, 11);
    scan_input!(AN12, 12);
    scan_input!(AN13, 13);
    scan_input!(AN14, 14);
    scan_input!(AN15, 15);

    /// The low reference voltage, multiplexed on the AN0 bit.
    pub const VREF_LOW: ScanInputs = Self::AN0;
    /// The CTMU temperature diode, multiplexed on the AN13 bit.
    pub const CTMU_TEMP: ScanInputs = Self::AN13;
    /// The internal voltage reference, multiplexed on the AN14 bit.
    pub const IVREF: ScanInputs = Self::AN14;
    /// The analog ground, multiplexed on the AN15 bit.
    pub const VSS: ScanInputs = Self::AN15;

    /// Builds a set from a raw channel mask.
    pub const fn new(bits: u16) -> Self {
        ScanInputs(bits)
    }

    /// The raw channel mask.
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Number of channels in the set.
    pub const fn count(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Whether no channel is selected.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl core::ops::BitOr for ScanInputs {
    type Output = ScanInputs;

    fn bitor(self, rhs: ScanInputs) -> ScanInputs {
        ScanInputs(self.0 | rhs.0)
    }
}

impl core::ops::BitOrAssign for ScanInputs {
    fn bitor_assign(&mut self, rhs: ScanInputs) {
        self.0 |= rhs.0;
    }
}

impl From<Input> for ScanInputs {
    fn from(input: Input) -> ScanInputs {
        ScanInputs(1 << input as u8)
    }
}

/// Conversion clock sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockSource {
    /// The shared peripheral bus clock. The only source the rate search
    /// supports.
    PeripheralBus,
    /// The dedicated internal RC oscillator.
    InternalRc,
}

/// Running state of the multi-sample averaging function.
///
/// Owned by the control block for exactly as long as averaging is enabled;
/// disabling or reconfiguring averaging releases it.
struct Averaging {
    sums: [u32; FIFO_DEPTH],
    channels: usize,
    target: u16,
    done: u16,
}

/// Per-device control block.
struct ControlBlock {
    state: State,
    saved_state: State,
    offset: i16,
    averaging: Option<Averaging>,
    dest: Option<&'static [ResultSlot]>,
    flag: Option<&'static CompletionFlag>,
    raw: [u16; FIFO_DEPTH],
}

impl ControlBlock {
    const fn new() -> Self {
        ControlBlock {
            state: State::Idle,
            saved_state: State::Idle,
            offset: 0,
            averaging: None,
            dest: None,
            flag: None,
            raw: [0; FIFO_DEPTH],
        }
    }
}

/// An analog-digital converter bound to its register block.
///
/// Holds exclusive access to the registers for the binding's lifetime;
/// [`Adc::free`] releases them.
pub struct Adc<D: AdcDevice> {
    device: D,
    ctl: ControlBlock,
}

impl<D: AdcDevice> Adc<D> {
    /// Binds `device` and brings the converter up in its baseline
    /// configuration: auto-trigger, single 16-bit result buffer, MUX A only,
    /// AVdd/AVss references, peripheral bus conversion clock, unsigned
    /// 16-bit results. The calibration offset starts at zero.
    pub fn new<T: DelayNs>(device: D, delay: &mut T) -> Self {
        let mut adc = Adc {
            device,
            ctl: ControlBlock::new(),
        };
        adc.init(delay);
        adc
    }

    /// Re-applies the baseline configuration and clears all driver state,
    /// including a latched [`State::Error`].
    pub fn reinitialize<T: DelayNs>(&mut self, delay: &mut T) {
        critical_section::with(|_| self.init(delay));
    }

    fn init<T: DelayNs>(&mut self, delay: &mut T) {
        self.device.con1.modify(|w| w.set_on(false));

        self.device.con1.modify(|w| {
            w.set_ssrc(TRIG_AUTO);
            w.set_form(FORMAT_U16);
            w.set_asam(false);
            w.set_clrasam(false);
        });
        self.device.con2.modify(|w| {
            w.set_bufm(false);
            w.set_vcfg(0);
            w.set_alts(false);
            w.set_cscna(false);
            w.set_offcal(false);
        });
        self.device.con3.modify(|w| w.set_adrc(false));

        self.ctl = ControlBlock::new();

        self.device.con1.modify(|w| w.set_on(true));
        delay.delay_ns(BOOT_TIME_NS);
    }

    /// Releases the underlying register block.
    pub fn free(self) -> D {
        self.device
    }

    /// The port this converter is bound to.
    pub fn port(&self) -> Port {
        D::PORT
    }

    /// The current driver state.
    pub fn state(&self) -> State {
        self.ctl.state
    }

    /// The calibration offset subtracted from every raw sample.
    pub fn offset(&self) -> i16 {
        self.ctl.offset
    }

    /// Enables the analog function on the pins in `inputs`.
    ///
    /// The corresponding TRIS bits must separately be configured as inputs.
    pub fn set_inputs(&mut self, inputs: ScanInputs) {
        self.device.pcfg.modify(|w| w.set_ansel(inputs.bits()));
    }

    /// Selects the channels converted by scan mode.
    ///
    /// A scan armed while this mask changes keeps its channel count until it
    /// completes; the next [`Adc::start_scan`] picks up the new mask.
    pub fn set_scan_inputs(&mut self, inputs: ScanInputs) {
        self.device.cssl.modify(|w| w.set_cssl(inputs.bits()));
    }

    /// The channels currently selected for scan mode.
    pub fn scan_inputs(&self) -> ScanInputs {
        ScanInputs::new(self.device.cssl.read().cssl())
    }

    /// Number of channels a scan started now would convert.
    pub fn scan_input_count(&self) -> usize {
        self.scan_inputs().count()
    }

    /// Selects the conversion clock source.
    ///
    /// Only valid while idle; the converter is briefly stopped to make the
    /// switch.
    pub fn set_clock_source<T: DelayNs>(
        &mut self,
        source: ClockSource,
        delay: &mut T,
    ) -> Result<(), Error> {
        critical_section::with(|_| {
            if self.ctl.state != State::Idle {
                return Err(Error::Busy);
            }

            let was_on = self.device.con1.read().on();
            self.device.con1.modify(|w| w.set_on(false));
            self.device
                .con3
                .modify(|w| w.set_adrc(source == ClockSource::InternalRc));
            self.device.con1.modify(|w| w.set_on(was_on));
            if was_on {
                delay.delay_ns(BOOT_TIME_NS);
            }
            Ok(())
        })
    }

    /// The currently selected conversion clock source.
    pub fn clock_source(&self) -> ClockSource {
        if self.device.con3.read().adrc() {
            ClockSource::InternalRc
        } else {
            ClockSource::PeripheralBus
        }
    }

    /// Configures the sample rate to the highest value at or below
    /// `desired`, for the given peripheral bus clock.
    ///
    /// Returns the achieved rate. Fails with [`Error::TooLarge`] when the
    /// request exceeds [`SAMPLE_RATE_MAX`] or is unreachable, with
    /// [`Error::Invalid`] when the conversion clock is not the peripheral
    /// bus clock, and with [`Error::Busy`] when the converter is not idle.
    pub fn configure_sample_rate<T: DelayNs>(
        &mut self,
        desired: HertzU32,
        pb_clock: HertzU32,
        delay: &mut T,
    ) -> Result<HertzU32, Error> {
        // The ceiling applies regardless of the clock source.
        if desired.to_Hz() > SAMPLE_RATE_MAX {
            return Err(Error::TooLarge);
        }

        critical_section::with(|_| {
            if self.ctl.state != State::Idle {
                return Err(Error::Busy);
            }
            if self.device.con3.read().adrc() {
                return Err(Error::Invalid);
            }
            self.ctl.state = State::Configuring;
            Ok(())
        })?;

        let result = SampleTiming::find(pb_clock, desired).map(|timing| {
            // Apply with conversions stopped, then restore the run flag.
            let was_on = self.device.con1.read().on();
            self.device.con1.modify(|w| w.set_on(false));
            self.device.con3.modify(|w| {
                w.set_adcs(timing.adcs());
                w.set_samc(timing.samc());
            });
            self.device.con1.modify(|w| w.set_on(was_on));
            if was_on {
                delay.delay_ns(BOOT_TIME_NS);
            }
            timing.sample_rate(pb_clock)
        });

        critical_section::with(|_| self.ctl.state = State::Idle);
        result
    }

    /// The sample rate currently configured in hardware, for the given
    /// peripheral bus clock.
    pub fn sample_rate(&self, pb_clock: HertzU32) -> HertzU32 {
        let con3 = self.device.con3.read();
        let timing = SampleTiming {
            adcs: con3.adcs(),
            samc: con3.samc(),
        };
        timing.sample_rate(pb_clock)
    }

    /// Enables multi-sample averaging over `samples` completion events of
    /// `channels` channels each.
    ///
    /// The per-channel accumulator is owned by the driver while averaging is
    /// enabled, and sized to `channels`; every request armed while averaging
    /// is on must match that channel count. Re-enabling replaces the
    /// accumulator.
    pub fn enable_averaging(&mut self, samples: u16, channels: usize) -> Result<(), Error> {
        if samples == 0 || channels == 0 || channels > FIFO_DEPTH {
            return Err(Error::Fail);
        }
        critical_section::with(|_| {
            if self.ctl.state != State::Idle {
                return Err(Error::Busy);
            }
            self.ctl.averaging = Some(Averaging {
                sums: [0; FIFO_DEPTH],
                channels,
                target: samples,
                done: 0,
            });
            Ok(())
        })
    }

    /// Disables averaging and releases the accumulator.
    pub fn disable_averaging(&mut self) {
        critical_section::with(|_| self.ctl.averaging = None);
    }

    /// Whether averaging is enabled.
    pub fn is_averaging(&self) -> bool {
        self.ctl.averaging.is_some()
    }

    /// Enables the conversion-complete interrupt.
    pub fn enable_interrupt(&mut self) {
        self.device.enable_interrupt();
    }

    /// Disables the conversion-complete interrupt.
    pub fn disable_interrupt(&mut self) {
        self.device.disable_interrupt();
    }

    /// Assigns priority and sub-priority to the conversion-complete
    /// interrupt.
    pub fn set_interrupt_priority(&mut self, priority: u8, sub_priority: u8) {
        self.device.set_interrupt_priority(priority, sub_priority);
    }
}
