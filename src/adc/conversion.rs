//! Conversion requests, the result pipeline and the completion handler.

use super::{
    Adc, AdcDevice, CompletionFlag, ConversionStatus, Error, Input, ResultSlot, State,
    CAL_BURST_LEN,
};
use crate::regs::FIFO_DEPTH;

impl<D: AdcDevice> Adc<D> {
    /// Starts `count` back-to-back conversions of `input`, up to the FIFO
    /// depth.
    ///
    /// The hardware stops itself after the burst and raises the completion
    /// interrupt; the handler then delivers the offset-corrected results
    /// into `dest` and sets `flag` to done. With averaging enabled the
    /// request must convert exactly the averaged channel count, and `flag`
    /// only moves to done on the event that reaches the averaging target.
    ///
    /// Fails with [`Error::Busy`] unless the driver is idle, leaving `dest`
    /// and `flag` untouched. Fails with [`Error::Fail`] when `count` is
    /// zero, `dest` is too small for `count`, or `count` does not match the
    /// averaged channel count.
    pub fn convert(
        &mut self,
        input: Input,
        count: usize,
        dest: &'static [ResultSlot],
        flag: &'static CompletionFlag,
    ) -> Result<(), Error> {
        if count == 0 {
            return Err(Error::Fail);
        }
        let count = count.min(FIFO_DEPTH);
        if dest.len() < count {
            return Err(Error::Fail);
        }

        critical_section::with(|_| {
            if self.ctl.state != State::Idle {
                return Err(Error::Busy);
            }
            if self
                .ctl
                .averaging
                .as_ref()
                .is_some_and(|avg| avg.channels != count)
            {
                return Err(Error::Fail);
            }

            // MUX A, negative input VrefL.
            self.device.chs.modify(|w| {
                w.set_ch0na(false);
                w.set_ch0sa(input as u8);
            });

            self.ctl.dest = Some(dest);
            self.ctl.flag = Some(flag);
            self.ctl.state = State::Busy;

            flag.set(ConversionStatus::Busy);
            self.device.con2.modify(|w| {
                w.set_cscna(false);
                w.set_smpi((count - 1) as u8);
            });
            self.device.con1.modify(|w| {
                w.set_asam(true);
                w.set_clrasam(true);
            });
            self.device.con1.modify(|w| w.set_samp(true));
            Ok(())
        })
    }

    /// Arms a scan over the channels selected with
    /// [`Adc::set_scan_inputs`].
    ///
    /// The channel count is taken from the mask as it reads now, not from
    /// any earlier call. The scan re-arms itself after every pass until
    /// [`Adc::stop_scan`]; each pass delivers one set of results and, with
    /// averaging off, sets `flag` to done.
    ///
    /// Fails with [`Error::Busy`] unless the driver is idle, leaving `dest`
    /// and `flag` untouched. Fails with [`Error::Fail`] when the mask is
    /// empty, `dest` is too small for it, or its count does not match the
    /// averaged channel count.
    pub fn start_scan(
        &mut self,
        dest: &'static [ResultSlot],
        flag: &'static CompletionFlag,
    ) -> Result<(), Error> {
        critical_section::with(|_| {
            if self.ctl.state != State::Idle {
                return Err(Error::Busy);
            }

            let channels = self.scan_input_count();
            if channels == 0 || dest.len() < channels {
                return Err(Error::Fail);
            }
            if self
                .ctl
                .averaging
                .as_ref()
                .is_some_and(|avg| avg.channels != channels)
            {
                return Err(Error::Fail);
            }

            self.ctl.dest = Some(dest);
            self.ctl.flag = Some(flag);
            self.ctl.state = State::Busy;

            flag.set(ConversionStatus::Busy);
            self.device.con2.modify(|w| {
                w.set_smpi((channels - 1) as u8);
                w.set_cscna(true);
            });
            self.device.con1.modify(|w| {
                w.set_clrasam(true);
                w.set_asam(true);
            });
            Ok(())
        })
    }

    /// Stops a running scan after its current pass.
    ///
    /// The in-flight pass completes and delivers its results, after which
    /// the driver returns to idle. Does nothing when no scan is armed.
    pub fn stop_scan(&mut self) {
        critical_section::with(|_| {
            if self.ctl.state != State::Busy {
                return;
            }
            self.device.con2.modify(|w| w.set_cscna(false));
            self.device.con1.modify(|w| w.set_clrasam(true));
        });
    }

    /// Starts an offset-calibration burst.
    ///
    /// The converter samples its internal zero reference
    /// [`CAL_BURST_LEN`] times; the completion handler stores the mean as
    /// the new offset and returns to the state this call was made from.
    ///
    /// Fails with [`Error::Busy`] unless the driver is idle.
    pub fn calibrate(&mut self) -> Result<(), Error> {
        critical_section::with(|_| {
            if self.ctl.state != State::Idle {
                return Err(Error::Busy);
            }
            self.ctl.saved_state = self.ctl.state;
            self.ctl.state = State::Calibrating;

            self.device.con2.modify(|w| {
                w.set_offcal(true);
                w.set_cscna(false);
                w.set_smpi((CAL_BURST_LEN - 1) as u8);
            });
            self.device.con1.modify(|w| {
                w.set_asam(true);
                w.set_clrasam(true);
            });
            self.device.con1.modify(|w| w.set_samp(true));
            Ok(())
        })
    }

    /// Conversion-complete interrupt handler.
    ///
    /// Call this from the AD1 interrupt vector. Drains the hardware result
    /// FIFO, then dispatches on the driver state; completion events arriving
    /// in any state that is not expecting one are discarded, which guards
    /// against a conversion straddling a reconfiguration.
    pub fn on_interrupt(&mut self) {
        self.device.clear_interrupt();

        let active = (self.device.con2.read().smpi() as usize + 1).min(FIFO_DEPTH);
        for (raw, reg) in self.ctl.raw[..active].iter_mut().zip(self.device.buf.iter()) {
            *raw = reg.read().result();
        }

        match self.ctl.state {
            State::Busy => self.finish_conversion(active),
            State::Calibrating => self.finish_calibration(active),
            _ => {}
        }
    }

    /// Main-loop tick. Holds a faulted converter disabled.
    pub fn poll(&mut self) {
        if self.ctl.state == State::Error {
            self.device.con1.modify(|w| w.set_on(false));
        }
    }

    /// Offset-corrects the drained samples and delivers them, either
    /// directly or through the averaging accumulator.
    fn finish_conversion(&mut self, active: usize) {
        let (dest, flag) = match (self.ctl.dest, self.ctl.flag) {
            (Some(dest), Some(flag)) if dest.len() >= active => (dest, flag),
            // A busy state without usable caller storage means the control
            // block was corrupted.
            _ => return self.fault(),
        };
        if self
            .ctl
            .averaging
            .as_ref()
            .is_some_and(|avg| avg.channels != active)
        {
            return self.fault();
        }

        let offset = self.ctl.offset;
        match self.ctl.averaging.as_mut() {
            Some(avg) => {
                for (sum, &raw) in avg.sums.iter_mut().zip(&self.ctl.raw[..active]) {
                    *sum = sum.wrapping_add(u32::from(raw.wrapping_sub(offset as u16)));
                }

                // One event per interrupt, not one per channel.
                avg.done += 1;
                if avg.done >= avg.target {
                    for (slot, sum) in dest.iter().zip(avg.sums[..active].iter_mut()) {
                        slot.set((*sum / u32::from(avg.target)) as u16);
                        *sum = 0;
                    }
                    avg.done = 0;
                    flag.set(ConversionStatus::Done);
                }
            }
            None => {
                for (slot, &raw) in dest.iter().zip(&self.ctl.raw[..active]) {
                    slot.set(raw.wrapping_sub(offset as u16));
                }
                flag.set(ConversionStatus::Done);
            }
        }

        // Continuous scan re-arms itself; single-shot goes back to idle.
        if self.device.con2.read().cscna() {
            self.device.con1.modify(|w| w.set_asam(true));
        } else {
            self.ctl.state = State::Idle;
        }
    }

    /// Stores the burst mean as the new offset and resumes the state the
    /// calibration preempted.
    fn finish_calibration(&mut self, active: usize) {
        let burst = active.min(CAL_BURST_LEN);
        let sum: u32 = self.ctl.raw[..burst].iter().map(|&raw| u32::from(raw)).sum();
        self.ctl.offset = (sum / burst as u32) as i16;

        self.device.con2.modify(|w| w.set_offcal(false));
        self.ctl.state = self.ctl.saved_state;
    }

    fn fault(&mut self) {
        self.ctl.state = State::Error;
        self.device.con1.modify(|w| w.set_on(false));
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{bound_adc, complete_with, leak_dest, leak_flag, NoDelay};
    use super::*;
    use crate::adc::ScanInputs;

    #[test]
    fn convert_arms_a_single_shot_burst() {
        let mut adc = bound_adc();
        let dest = leak_dest(4);
        let flag = leak_flag();

        adc.convert(Input::An3, 4, dest, flag).unwrap();

        assert_eq!(adc.state(), State::Busy);
        assert!(!flag.is_done());
        let chs = adc.device.chs.read();
        assert_eq!(chs.ch0sa(), 3);
        assert!(!chs.ch0na());
        let con2 = adc.device.con2.read();
        assert_eq!(con2.smpi(), 3);
        assert!(!con2.cscna());
        let con1 = adc.device.con1.read();
        assert!(con1.asam());
        assert!(con1.clrasam());
        assert!(con1.samp());
    }

    #[test]
    fn completion_delivers_offset_corrected_results() {
        let mut adc = bound_adc();
        let dest = leak_dest(4);
        let flag = leak_flag();

        adc.convert(Input::An1, 4, dest, flag).unwrap();
        complete_with(&mut adc, &[100, 200, 300, 400]);

        assert_eq!(adc.state(), State::Idle);
        assert!(flag.is_done());
        let delivered: Vec<u16> = dest.iter().map(|slot| slot.get()).collect();
        assert_eq!(delivered, [100, 200, 300, 400]);
    }

    #[test]
    fn oversized_counts_are_clamped_to_the_fifo_depth() {
        let mut adc = bound_adc();
        let dest = leak_dest(FIFO_DEPTH);
        adc.convert(Input::An0, 200, dest, leak_flag()).unwrap();
        assert_eq!(adc.device.con2.read().smpi() as usize, FIFO_DEPTH - 1);
    }

    #[test]
    fn unusable_storage_is_rejected_up_front() {
        let mut adc = bound_adc();
        let flag = leak_flag();

        assert_eq!(
            adc.convert(Input::An0, 0, leak_dest(4), flag),
            Err(Error::Fail)
        );
        // Destination smaller than the burst.
        assert_eq!(
            adc.convert(Input::An0, 4, leak_dest(2), flag),
            Err(Error::Fail)
        );
        // Scan with an empty mask.
        assert_eq!(adc.start_scan(leak_dest(4), flag), Err(Error::Fail));
        assert_eq!(adc.state(), State::Idle);
    }

    #[test]
    fn busy_rejection_leaves_caller_storage_untouched() {
        let mut adc = bound_adc();
        adc.convert(Input::An0, 2, leak_dest(2), leak_flag()).unwrap();

        let dest = leak_dest(2);
        let flag = leak_flag();
        assert_eq!(adc.convert(Input::An1, 2, dest, flag), Err(Error::Busy));
        assert_eq!(adc.start_scan(dest, flag), Err(Error::Busy));
        assert_eq!(adc.calibrate(), Err(Error::Busy));

        assert!(flag.is_done());
        assert_eq!(dest[0].get(), 0);
        assert_eq!(adc.state(), State::Busy);
        // The armed channel is still the first request's.
        assert_eq!(adc.device.chs.read().ch0sa(), 0);
    }

    #[test]
    fn averaging_a_constant_input_is_exact() {
        let mut adc = bound_adc();

        // Calibrate to a known offset of 100.
        adc.calibrate().unwrap();
        complete_with(&mut adc, &[100; CAL_BURST_LEN]);
        assert_eq!(adc.offset(), 100);

        adc.enable_averaging(8, 1).unwrap();
        let dest = leak_dest(1);
        let flag = leak_flag();

        for event in 0..8 {
            adc.convert(Input::An2, 1, dest, flag).unwrap();
            complete_with(&mut adc, &[612]);
            // Each burst returns the driver to idle, but the flag only
            // completes once the averaging target is reached.
            assert_eq!(adc.state(), State::Idle);
            assert_eq!(flag.is_done(), event == 7);
        }

        assert_eq!(dest[0].get(), 512);

        // The accumulator and event counter were reset for the next round.
        adc.convert(Input::An2, 1, dest, flag).unwrap();
        complete_with(&mut adc, &[612]);
        assert!(!flag.is_done());
    }

    #[test]
    fn averaging_channel_mismatch_is_rejected() {
        let mut adc = bound_adc();
        adc.enable_averaging(4, 2).unwrap();

        assert_eq!(
            adc.convert(Input::An0, 3, leak_dest(3), leak_flag()),
            Err(Error::Fail)
        );

        adc.set_scan_inputs(ScanInputs::AN0 | ScanInputs::AN1 | ScanInputs::AN2);
        assert_eq!(adc.start_scan(leak_dest(3), leak_flag()), Err(Error::Fail));
    }

    #[test]
    fn scan_uses_the_mask_as_it_reads_at_arm_time() {
        let mut adc = bound_adc();
        adc.set_scan_inputs(ScanInputs::AN0 | ScanInputs::AN1 | ScanInputs::AN4);
        let dest = leak_dest(5);
        let flag = leak_flag();

        adc.start_scan(dest, flag).unwrap();
        assert_eq!(adc.device.con2.read().smpi(), 2);
        assert!(adc.device.con2.read().cscna());

        // Widening the mask mid-pass must not change the in-flight count.
        adc.set_scan_inputs(ScanInputs::new(0b1_1111));
        assert_eq!(adc.device.con2.read().smpi(), 2);

        complete_with(&mut adc, &[11, 22, 44]);
        assert!(flag.is_done());
        assert_eq!(dest[1].get(), 22);
        // Scan mode re-arms instead of going idle.
        assert_eq!(adc.state(), State::Busy);
        assert!(adc.device.con1.read().asam());

        // The next arm picks up the new mask.
        adc.stop_scan();
        complete_with(&mut adc, &[11, 22, 44]);
        assert_eq!(adc.state(), State::Idle);
        adc.start_scan(dest, flag).unwrap();
        assert_eq!(adc.device.con2.read().smpi(), 4);
    }

    #[test]
    fn stop_scan_lets_the_current_pass_finish() {
        let mut adc = bound_adc();
        adc.set_scan_inputs(ScanInputs::AN2 | ScanInputs::AN3);
        let dest = leak_dest(2);
        let flag = leak_flag();
        adc.start_scan(dest, flag).unwrap();

        adc.stop_scan();
        assert!(!adc.device.con2.read().cscna());
        assert!(adc.device.con1.read().clrasam());
        assert_eq!(adc.state(), State::Busy);

        complete_with(&mut adc, &[7, 8]);
        assert_eq!(adc.state(), State::Idle);
        assert!(flag.is_done());
        assert_eq!(dest[0].get(), 7);
        assert_eq!(dest[1].get(), 8);
    }

    #[test]
    fn stop_scan_outside_a_scan_is_a_no_op() {
        let mut adc = bound_adc();
        adc.device.con2.modify(|w| w.set_cscna(true));
        adc.stop_scan();
        assert!(adc.device.con2.read().cscna());
    }

    #[test]
    fn calibration_stores_the_burst_mean_and_resumes() {
        let mut adc = bound_adc();

        adc.calibrate().unwrap();
        assert_eq!(adc.state(), State::Calibrating);
        let con2 = adc.device.con2.read();
        assert!(con2.offcal());
        assert_eq!(con2.smpi() as usize, CAL_BURST_LEN - 1);

        complete_with(&mut adc, &[40, 41, 42, 43, 44, 45, 46, 47, 48, 49]);
        assert_eq!(adc.offset(), 44);
        assert_eq!(adc.state(), State::Idle);
        assert!(!adc.device.con2.read().offcal());

        // Later conversions are corrected by the new offset.
        let dest = leak_dest(1);
        let flag = leak_flag();
        adc.convert(Input::An5, 1, dest, flag).unwrap();
        complete_with(&mut adc, &[1000]);
        assert_eq!(dest[0].get(), 956);
    }

    #[test]
    fn spurious_completions_are_discarded() {
        let mut adc = bound_adc();
        // No request in flight; a stray interrupt must change nothing.
        complete_with(&mut adc, &[123, 456]);
        assert_eq!(adc.state(), State::Idle);
        assert!(adc.device.con1.read().on());
    }

    #[test]
    fn corrupted_control_state_fails_safe() {
        let mut adc = bound_adc();
        // Force a busy state with no bound destination.
        adc.ctl.state = State::Busy;
        adc.on_interrupt();

        assert_eq!(adc.state(), State::Error);
        assert!(!adc.device.con1.read().on());

        // Requests stay rejected and the poll tick keeps the device down.
        assert_eq!(
            adc.convert(Input::An0, 1, leak_dest(1), leak_flag()),
            Err(Error::Busy)
        );
        adc.device.con1.modify(|w| w.set_on(true));
        adc.poll();
        assert!(!adc.device.con1.read().on());

        // Only a full re-initialization recovers.
        adc.reinitialize(&mut NoDelay);
        assert_eq!(adc.state(), State::Idle);
        assert!(adc.device.con1.read().on());
    }
}
