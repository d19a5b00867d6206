use crate::config::{DetectorConfig, FeeConfig, E_CHARGE};
use crate::geometry::PixelId;
use crate::reduce::MAX_TRACKS_PER_PIXEL;
use crate::{Error, Observer};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// One digitized charge measurement emitted by a pixel's front end.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdcSample {
    /// Integrated charge at sampling time, in coulomb, noise included.
    pub charge: f64,
    /// The charge converted to ADC counts.
    pub adc: u16,
    /// Registration time of the trigger, in microseconds.
    pub timestamp: f64,
    /// `(track id, fraction)` pairs attributing the sampled charge to the
    /// tracks holding slots on this pixel. The fractions sum to one.
    pub fractions: Vec<(u32, f64)>,
}

/// Converts an integrated charge to clamped ADC counts.
pub fn digitize(charge: f64, fee: &FeeConfig) -> u16 {
    let counts = fee.adc_counts as f64;
    let mv = (charge * fee.gain / E_CHARGE + fee.v_pedestal - fee.v_cm).max(0.0);

    (mv * counts / (fee.v_ref - fee.v_cm)).round().min(counts) as u16
}

fn normal<R: Rng>(rng: &mut R) -> f64 {
    rng.sample(StandardNormal)
}

// Integrates the current of one tick into `shares` and returns the charge
// added to the running sum. With a positive buffer risetime the raw current
// is low-pass filtered through an exponential buffer response reaching back
// to the last reset.
fn integrate_tick(
    fee: &FeeConfig,
    dt: f64,
    total: &[f64],
    per_track: &[[f64; MAX_TRACKS_PER_PIXEL]],
    ic: usize,
    last_reset: usize,
    shares: &mut [f64; MAX_TRACKS_PER_PIXEL],
) -> f64 {
    if fee.buffer_risetime > 0.0 {
        let tau = fee.buffer_risetime;
        let mut q = 0.0;
        for jc in last_reset..(ic + 1).min(total.len()) {
            let w = ((jc as f64 - ic as f64) * dt / tau).exp() * (1.0 - (-dt / tau).exp());
            q += total[jc] * dt * w;
            for (slot, share) in shares.iter_mut().enumerate() {
                *share += per_track[ic][slot] * dt * w;
            }
        }
        q
    } else {
        for (slot, share) in shares.iter_mut().enumerate() {
            *share += per_track[ic][slot] * dt;
        }
        total[ic] * dt
    }
}

/// Runs the self-trigger automaton of one pixel over its accumulated
/// waveform and returns the ADC samples it emits, in time order.
///
/// The automaton integrates charge since the last reset; when the running
/// sum plus discriminator noise crosses the threshold it keeps integrating
/// through a hold window, samples the result with fresh noise, and either
/// discards it (a noise-induced false trigger) or emits an [`AdcSample`]
/// with the per-track charge fractions normalized to sum to one. After a
/// conversion the channel is busy for a configured dead time. Producing more
/// than [`FeeConfig::max_adc_values`] samples is a fatal
/// [`Error::AdcCapacity`].
#[allow(clippy::too_many_arguments)]
pub fn digitize_pixel<R, O>(
    fee: &FeeConfig,
    detector: &DetectorConfig,
    pixel: PixelId,
    total: &[f64],
    per_track: &[[f64; MAX_TRACKS_PER_PIXEL]],
    tracks: &[u32],
    threshold: f64,
    rng: &mut R,
    observer: &mut O,
) -> Result<Vec<AdcSample>, Error>
where
    R: Rng,
    O: Observer,
{
    let dt = detector.time_sampling.get();
    let clock = fee.clock_cycle.get();
    let n = total.len();

    let mut samples = Vec::new();
    let mut shares = [0.0; MAX_TRACKS_PER_PIXEL];
    let mut ic = 0usize;
    let mut busy = 0usize;
    let mut last_reset = 0usize;
    let mut q_sum = normal(rng) * fee.reset_noise * E_CHARGE;

    while ic < n || busy > 0 {
        if ic < n {
            q_sum += integrate_tick(fee, dt, total, per_track, ic, last_reset, &mut shares);
        }

        let q_noise = normal(rng) * fee.uncorrelated_noise * E_CHARGE;
        let disc_noise = normal(rng) * fee.discriminator_noise * E_CHARGE;

        if busy > 0 {
            busy -= 1;
        }

        if q_sum + q_noise >= threshold + disc_noise && busy == 0 {
            let crossing = ic;
            observer.on_trigger(pixel, crossing);

            let hold = ((3.0 * clock + fee.adc_hold_delay * clock) / dt).round() as usize;
            let integrate_end = ic + hold;

            ic += 1;
            while ic <= integrate_end && ic < n {
                q_sum += integrate_tick(fee, dt, total, per_track, ic, last_reset, &mut shares);
                ic += 1;
            }

            let adc = q_sum + normal(rng) * fee.uncorrelated_noise * E_CHARGE;
            let disc_noise = normal(rng) * fee.discriminator_noise * E_CHARGE;

            if adc < threshold + disc_noise {
                observer.on_false_trigger(pixel, crossing);
                // Advance at least one tick so the scan always makes
                // progress.
                ic += ((clock / dt).round() as usize).max(1);
                q_sum = normal(rng) * fee.uncorrelated_noise * E_CHARGE;
                shares = [0.0; MAX_TRACKS_PER_PIXEL];
                last_reset = ic;
                continue;
            }

            if samples.len() == fee.max_adc_values {
                return Err(Error::AdcCapacity {
                    pixel,
                    max: fee.max_adc_values,
                });
            }

            let share_sum: f64 = shares.iter().sum();
            let fractions = tracks
                .iter()
                .enumerate()
                .map(|(slot, &track)| {
                    let fraction = if share_sum != 0.0 {
                        shares[slot] / share_sum
                    } else {
                        0.0
                    };
                    (track, fraction)
                })
                .collect();

            // Two extra ticks between the trigger crossing and when the
            // readout registers it.
            let timestamp =
                detector.time_interval.0 + crossing as f64 * dt + detector.time_padding + 2.0;

            let sample = AdcSample {
                charge: adc,
                adc: digitize(adc, fee),
                timestamp,
                fractions,
            };
            observer.on_adc_sample(pixel, &sample);
            samples.push(sample);

            shares = [0.0; MAX_TRACKS_PER_PIXEL];
            ic += (fee.reset_cycles * clock / dt).round() as usize;
            last_reset = ic;
            busy = (fee.adc_busy_delay * clock / dt).round() as usize;
            q_sum = normal(rng) * fee.reset_noise * E_CHARGE;
            continue;
        }

        ic += 1;
    }

    Ok(samples)
}
