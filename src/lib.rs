//! A driver for the 10-bit analog-digital converter found on PIC32MX
//! microcontrollers.
//!
//! The converter is operated exclusively in its auto-sample mode: the
//! hardware runs a burst of conversions on its own clocking, fills its
//! 16-slot result FIFO and raises an interrupt. The [`adc`] module owns the
//! state machine around that cycle, including sample-rate configuration,
//! channel scanning, offset calibration and multi-sample averaging. The
//! [`regs`] module holds the register-block binding the driver works
//! against.
//!
//! Results land in caller-owned atomic cells, so the completion side of the
//! driver can run from the interrupt vector while the requesting side runs
//! from the main loop. See the [`adc`] module documentation for a usage
//! example.

#![warn(missing_docs)]
#![cfg_attr(not(test), no_std)]

pub mod adc;
pub mod regs;

mod typelevel;
