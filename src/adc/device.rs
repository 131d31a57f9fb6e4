//! Device binding for the ADC driver.
//!
//! [`AdcDevice`] ties a register block to its completion-interrupt plumbing
//! in the interrupt controller. Only one port exists on this target, but the
//! trait admits any small enumeration of ports.

use core::ops::Deref;

use super::Error;
use crate::regs::{RegisterBlock, ADC1};
use crate::typelevel::Sealed;

/// Hardware ADC port identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Port {
    /// The AD1 converter.
    Adc1,
}

impl TryFrom<u8> for Port {
    type Error = Error;

    fn try_from(index: u8) -> Result<Self, Error> {
        match index {
            0 => Ok(Port::Adc1),
            _ => Err(Error::NotFound),
        }
    }
}

/// A bound ADC peripheral: the full register block plus control over its
/// conversion-complete interrupt.
pub trait AdcDevice: Deref<Target = RegisterBlock> + Sealed {
    /// Hardware port identity of this device.
    const PORT: Port;

    /// Enables the conversion-complete interrupt in the interrupt
    /// controller.
    fn enable_interrupt(&mut self);

    /// Disables the conversion-complete interrupt.
    fn disable_interrupt(&mut self);

    /// Clears the pending conversion-complete flag.
    fn clear_interrupt(&mut self);

    /// Assigns priority (0..=7) and sub-priority (0..=3) to the
    /// conversion-complete interrupt.
    fn set_interrupt_priority(&mut self, priority: u8, sub_priority: u8);
}

// AD1 convert-done is persistent interrupt 27: flag IFS0<27>, enable
// IEC0<27>, priority IPC6<28:26> with sub-priority IPC6<25:24>. The
// controller's atomic CLR/SET views sit at +4/+8 from each base register.
const IFS0_CLR: *mut u32 = 0xBF88_1034 as *mut u32;
const IEC0_CLR: *mut u32 = 0xBF88_1064 as *mut u32;
const IEC0_SET: *mut u32 = 0xBF88_1068 as *mut u32;
const IPC6: *mut u32 = 0xBF88_10F0 as *mut u32;
const AD1_IRQ_MASK: u32 = 1 << 27;
const AD1_IPC_SHIFT: u32 = 24;

impl Sealed for ADC1 {}

impl AdcDevice for ADC1 {
    const PORT: Port = Port::Adc1;

    fn enable_interrupt(&mut self) {
        unsafe { IEC0_SET.write_volatile(AD1_IRQ_MASK) };
    }

    fn disable_interrupt(&mut self) {
        unsafe { IEC0_CLR.write_volatile(AD1_IRQ_MASK) };
    }

    fn clear_interrupt(&mut self) {
        unsafe { IFS0_CLR.write_volatile(AD1_IRQ_MASK) };
    }

    fn set_interrupt_priority(&mut self, priority: u8, sub_priority: u8) {
        let bits =
            ((priority as u32 & 0x7) << 2 | (sub_priority as u32 & 0x3)) << AD1_IPC_SHIFT;
        // IPC has no SET/CLR shortcut usable for a field update, so
        // read-modify-write with interrupts masked.
        critical_section::with(|_| unsafe {
            let current = IPC6.read_volatile();
            IPC6.write_volatile((current & !(0x1F << AD1_IPC_SHIFT)) | bits);
        });
    }
}
