//! Sample-rate timing for the converter.
//!
//! The achieved sample rate is a function of the peripheral bus clock, the
//! conversion clock divider (ADCS) and the auto-sample time (SAMC):
//!
//! ```text
//! rate = Fpb / (2 * (ADCS + 1) * (CONV_TIME + SAMC))
//! ```
//!
//! [`SampleTiming::find`] searches for the (ADCS, SAMC) pair giving the
//! highest throughput at or below a requested rate, subject to the
//! conversion-clock ceiling. See section 17 of the family reference manual
//! for the timing equations.

use fugit::HertzU32;

use super::Error;

/// Absolute ceiling on the configurable sample rate, in samples per second.
pub const SAMPLE_RATE_MAX: u32 = 1_000_000;

/// Maximum conversion clock (Tad) frequency, in Hz.
pub const TAD_FREQ_MAX: u32 = 15_000_000;

/// Conversion time of the SAR core, in Tad periods.
pub const CONV_TIME_TAD: u32 = 12;

// SAMC is a 5-bit field; the hardware requires at least one Tad of sampling.
const SAMC_MIN: u32 = 1;
const SAMC_MAX: u32 = 31;
const ADCS_MAX: u32 = 255;

/// A valid (conversion clock divider, auto-sample time) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SampleTiming {
    pub(crate) adcs: u8,
    pub(crate) samc: u8,
}

impl SampleTiming {
    /// Finds the timing pair that yields the highest sample rate at or below
    /// `desired`.
    ///
    /// The search is deterministic: the same `(pb_clock, desired)` always
    /// yields the same pair. Fails with [`Error::TooLarge`] when `desired`
    /// exceeds [`SAMPLE_RATE_MAX`], or cannot be reached within the divider
    /// and sample-time ranges.
    pub fn find(pb_clock: HertzU32, desired: HertzU32) -> Result<Self, Error> {
        let pb = pb_clock.to_Hz();
        let wanted = desired.to_Hz();

        if wanted == 0 || wanted > SAMPLE_RATE_MAX {
            return Err(Error::TooLarge);
        }

        // Smallest divider keeping the conversion clock within its ceiling.
        // Every larger divider lowers Tad further, so the constraint holds
        // for the whole search range.
        let mut adcs = 0;
        while tad_freq(pb, adcs) > TAD_FREQ_MAX {
            adcs += 1;
        }

        // Highest throughput achievable at that divider, with SAMC at its
        // minimum. If this falls short, no pair can satisfy the request.
        if rate_of(pb, adcs, SAMC_MIN) < wanted {
            return Err(Error::TooLarge);
        }

        while adcs <= ADCS_MAX {
            if let Some(samc) = sample_time_for(pb, wanted, adcs) {
                return Ok(SampleTiming {
                    adcs: adcs as u8,
                    samc: samc as u8,
                });
            }
            adcs += 1;
        }

        Err(Error::TooLarge)
    }

    /// The sample rate this pair achieves for the given peripheral bus
    /// clock.
    pub fn sample_rate(&self, pb_clock: HertzU32) -> HertzU32 {
        HertzU32::from_raw(rate_of(
            pb_clock.to_Hz(),
            self.adcs as u32,
            self.samc as u32,
        ))
    }

    /// The conversion clock divider.
    pub fn adcs(&self) -> u8 {
        self.adcs
    }

    /// The auto-sample time, in Tad periods.
    pub fn samc(&self) -> u8 {
        self.samc
    }
}

/// Smallest sample time at this divider that keeps the achieved rate at or
/// below the request, if one exists in the representable range.
fn sample_time_for(pb: u32, wanted: u32, adcs: u32) -> Option<u32> {
    let tad_per_sample = pb.div_ceil(wanted * 2 * (adcs + 1));
    let mut samc = tad_per_sample.saturating_sub(CONV_TIME_TAD).max(SAMC_MIN);

    // Integer truncation in the divider chain can still land the achieved
    // rate above the request.
    while samc < SAMC_MAX && rate_of(pb, adcs, samc) > wanted {
        samc += 1;
    }

    (samc < SAMC_MAX && rate_of(pb, adcs, samc) <= wanted).then_some(samc)
}

fn tad_freq(pb: u32, adcs: u32) -> u32 {
    pb / (2 * (adcs + 1))
}

fn rate_of(pb: u32, adcs: u32, samc: u32) -> u32 {
    pb / (2 * (adcs + 1) * (CONV_TIME_TAD + samc))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PB_40MHZ: HertzU32 = HertzU32::from_raw(40_000_000);

    #[test]
    fn reference_manual_example() {
        // 40 MHz PB clock: ADCS 0 gives a 20 MHz Tad, so the minimal usable
        // divider is 1, and 500 kSPS lands exactly on SAMC = 8.
        let timing = SampleTiming::find(PB_40MHZ, HertzU32::from_raw(500_000)).unwrap();
        assert_eq!(timing, SampleTiming { adcs: 1, samc: 8 });
        assert_eq!(timing.sample_rate(PB_40MHZ).to_Hz(), 500_000);
    }

    #[test]
    fn achieved_rate_is_maximal_below_request() {
        let timing = SampleTiming::find(PB_40MHZ, HertzU32::from_raw(500_000)).unwrap();
        let achieved = timing.sample_rate(PB_40MHZ).to_Hz();
        assert!(achieved <= 500_000);

        // One Tad less of sampling at the same divider overshoots the
        // request, so no faster pair exists below it.
        let coarser = SampleTiming {
            adcs: timing.adcs,
            samc: timing.samc - 1,
        };
        assert!(coarser.sample_rate(PB_40MHZ).to_Hz() > 500_000);
    }

    #[test]
    fn rejects_rates_over_the_ceiling() {
        for pb in [8_000_000, 40_000_000, 80_000_000, u32::MAX] {
            assert_eq!(
                SampleTiming::find(HertzU32::from_raw(pb), HertzU32::from_raw(1_000_001)),
                Err(Error::TooLarge)
            );
        }
    }

    #[test]
    fn rejects_infeasible_rates_at_minimal_divider() {
        // Best achievable at 40 MHz is 769 kSPS (ADCS = 1, SAMC = 1).
        assert_eq!(
            SampleTiming::find(PB_40MHZ, HertzU32::from_raw(800_000)),
            Err(Error::TooLarge)
        );
    }

    #[test]
    fn rejects_rates_below_the_representable_range() {
        // The slowest pair at 40 MHz is (255, 30), about 1.8 kSPS.
        assert_eq!(
            SampleTiming::find(PB_40MHZ, HertzU32::from_raw(1_000)),
            Err(Error::TooLarge)
        );
    }

    #[test]
    fn search_is_deterministic() {
        let desired = HertzU32::from_raw(250_000);
        assert_eq!(
            SampleTiming::find(PB_40MHZ, desired),
            SampleTiming::find(PB_40MHZ, desired)
        );
    }

    #[test]
    fn conversion_clock_stays_within_its_ceiling() {
        for desired in [10_000, 100_000, 500_000, 769_000] {
            let timing = SampleTiming::find(PB_40MHZ, HertzU32::from_raw(desired)).unwrap();
            assert!(tad_freq(40_000_000, timing.adcs as u32) <= TAD_FREQ_MAX);
            assert!(timing.sample_rate(PB_40MHZ).to_Hz() <= desired);
        }
    }
}
