//! AD1 register block and field views.
//!
//! There is no published peripheral-access crate for this part, so the
//! register map of the 10-bit SAR converter (AD1CON1..AD1CSSL, AD1PCFG and
//! the ADC1BUF0..ADC1BUFF result FIFO) is described here directly: one
//! [`VolatileCell`](vcell::VolatileCell) per register, with a
//! [`bitfield`](bitfield::bitfield) view over the register word.

use core::marker::PhantomData;
use core::sync::atomic::{AtomicBool, Ordering};

use vcell::VolatileCell;

/// Field views that can be laid over a raw 32-bit register word.
pub trait RegValue: Copy {
    /// Wrap a raw register word.
    fn from_bits(bits: u32) -> Self;
    /// Unwrap into the raw register word.
    fn into_bits(self) -> u32;
}

/// A single 32-bit hardware register carrying the field view `V`.
#[repr(transparent)]
pub struct Reg<V: RegValue> {
    cell: VolatileCell<u32>,
    _view: PhantomData<V>,
}

impl<V: RegValue> Reg<V> {
    pub(crate) const fn new(bits: u32) -> Self {
        Reg {
            cell: VolatileCell::new(bits),
            _view: PhantomData,
        }
    }

    /// Reads the register.
    #[inline]
    pub fn read(&self) -> V {
        V::from_bits(self.cell.get())
    }

    /// Writes the register.
    #[inline]
    pub fn write(&self, value: V) {
        self.cell.set(value.into_bits());
    }

    /// Read-modify-writes the register.
    #[inline]
    pub fn modify<F: FnOnce(&mut V)>(&self, f: F) {
        let mut value = self.read();
        f(&mut value);
        self.write(value);
    }
}

bitfield::bitfield! {
    /// AD1CON1: trigger selection, result format and module enable.
    #[derive(Clone, Copy)]
    pub struct Con1(u32);
    impl Debug;
    /// Conversion done flag.
    pub done, set_done: 0;
    /// Manual sample start.
    pub samp, set_samp: 1;
    /// Auto-sample enable.
    pub asam, set_asam: 2;
    /// Stop conversions after the next interrupt (hardware clears ASAM).
    pub clrasam, set_clrasam: 4;
    /// Conversion trigger source selection.
    pub u8, ssrc, set_ssrc: 7, 5;
    /// Result format selection.
    pub u8, form, set_form: 10, 8;
    /// Stop in idle mode.
    pub sidl, set_sidl: 13;
    /// Module enable.
    pub on, set_on: 15;
}

bitfield::bitfield! {
    /// AD1CON2: buffering, scan mode and reference selection.
    #[derive(Clone, Copy)]
    pub struct Con2(u32);
    impl Debug;
    /// Alternate input sample mode enable.
    pub alts, set_alts: 0;
    /// Result buffer split selection.
    pub bufm, set_bufm: 1;
    /// Conversions per interrupt, minus one.
    pub u8, smpi, set_smpi: 5, 2;
    /// Buffer fill flag (only valid when BUFM is set).
    pub bufs, set_bufs: 7;
    /// Input scan mode enable.
    pub cscna, set_cscna: 10;
    /// Input offset calibration mode enable.
    pub offcal, set_offcal: 12;
    /// Voltage reference selection.
    pub u8, vcfg, set_vcfg: 15, 13;
}

bitfield::bitfield! {
    /// AD1CON3: conversion clock divider and auto-sample time.
    #[derive(Clone, Copy)]
    pub struct Con3(u32);
    impl Debug;
    /// Conversion clock divider (Tad = 2 * (ADCS + 1) / Tpb).
    pub u8, adcs, set_adcs: 7, 0;
    /// Auto-sample time, in Tad.
    pub u8, samc, set_samc: 12, 8;
    /// Conversion clock source: internal RC when set, PB clock when clear.
    pub adrc, set_adrc: 15;
}

bitfield::bitfield! {
    /// AD1CHS: multiplexer input selection.
    #[derive(Clone, Copy)]
    pub struct Chs(u32);
    impl Debug;
    /// Positive input selection for MUX A.
    pub u8, ch0sa, set_ch0sa: 19, 16;
    /// Negative input selection for MUX A.
    pub ch0na, set_ch0na: 23;
    /// Positive input selection for MUX B.
    pub u8, ch0sb, set_ch0sb: 27, 24;
    /// Negative input selection for MUX B.
    pub ch0nb, set_ch0nb: 31;
}

bitfield::bitfield! {
    /// AD1CSSL: scan mode input selection.
    #[derive(Clone, Copy)]
    pub struct Cssl(u32);
    impl Debug;
    /// One enable bit per analog channel.
    pub u16, cssl, set_cssl: 15, 0;
}

bitfield::bitfield! {
    /// AD1PCFG: analog function enable on the physical pins.
    #[derive(Clone, Copy)]
    pub struct Pcfg(u32);
    impl Debug;
    /// One analog-enable bit per channel.
    pub u16, ansel, set_ansel: 15, 0;
}

bitfield::bitfield! {
    /// ADC1BUFx: one slot of the conversion result FIFO.
    #[derive(Clone, Copy)]
    pub struct Buf(u32);
    impl Debug;
    /// The conversion result.
    pub u16, result, set_result: 15, 0;
}

macro_rules! reg_value {
    ($($view:ident),+ $(,)?) => {
        $(
            impl RegValue for $view {
                #[inline]
                fn from_bits(bits: u32) -> Self {
                    $view(bits)
                }

                #[inline]
                fn into_bits(self) -> u32 {
                    self.0
                }
            }
        )+
    };
}

reg_value!(Con1, Con2, Con3, Chs, Cssl, Pcfg, Buf);

/// Number of slots in the conversion result FIFO.
pub const FIFO_DEPTH: usize = 16;

/// The AD1 register block.
#[repr(C)]
pub struct RegisterBlock {
    /// AD1CON1
    pub con1: Reg<Con1>,
    /// AD1CON2
    pub con2: Reg<Con2>,
    /// AD1CON3
    pub con3: Reg<Con3>,
    /// AD1CHS
    pub chs: Reg<Chs>,
    /// AD1CSSL
    pub cssl: Reg<Cssl>,
    /// AD1PCFG
    pub pcfg: Reg<Pcfg>,
    /// ADC1BUF0..ADC1BUFF
    pub buf: [Reg<Buf>; FIFO_DEPTH],
}

impl RegisterBlock {
    /// A register block in its reset state, for driving the driver from
    /// host-side tests.
    #[cfg(test)]
    pub(crate) const fn new() -> Self {
        const ZERO: Reg<Buf> = Reg::new(0);
        RegisterBlock {
            con1: Reg::new(0),
            con2: Reg::new(0),
            con3: Reg::new(0),
            chs: Reg::new(0),
            cssl: Reg::new(0),
            pcfg: Reg::new(0),
            buf: [ZERO; FIFO_DEPTH],
        }
    }
}

static ADC1_TAKEN: AtomicBool = AtomicBool::new(false);

/// The first (and on this target, only) ADC peripheral.
pub struct ADC1 {
    _marker: PhantomData<*const ()>,
}

unsafe impl Send for ADC1 {}

impl ADC1 {
    /// Returns a pointer to the AD1 register block.
    pub const fn ptr() -> *const RegisterBlock {
        0xBF80_9000 as *const _
    }

    /// Takes the peripheral singleton.
    ///
    /// Returns `None` on every call after the first, unless the singleton
    /// was recreated with [`ADC1::steal`].
    pub fn take() -> Option<Self> {
        critical_section::with(|_| {
            if ADC1_TAKEN.load(Ordering::Relaxed) {
                None
            } else {
                ADC1_TAKEN.store(true, Ordering::Relaxed);
                Some(unsafe { ADC1::steal() })
            }
        })
    }

    /// Creates a new peripheral handle regardless of whether one is already
    /// live.
    ///
    /// # Safety
    ///
    /// The caller must ensure no other handle to AD1 is in use.
    pub unsafe fn steal() -> Self {
        ADC1 {
            _marker: PhantomData,
        }
    }
}

impl core::ops::Deref for ADC1 {
    type Target = RegisterBlock;

    fn deref(&self) -> &RegisterBlock {
        unsafe { &*Self::ptr() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn con3_field_layout() {
        let mut con3 = Con3(0);
        con3.set_adcs(0x2A);
        con3.set_samc(0x15);
        con3.set_adrc(true);
        assert_eq!(con3.0, (1 << 15) | (0x15 << 8) | 0x2A);
    }

    #[test]
    fn con1_round_trip() {
        let reg: Reg<Con1> = Reg::new(0);
        reg.modify(|w| {
            w.set_ssrc(0b111);
            w.set_on(true);
        });
        let con1 = reg.read();
        assert_eq!(con1.ssrc(), 0b111);
        assert!(con1.on());
        assert!(!con1.asam());
    }
}
