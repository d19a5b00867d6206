//! Detector-response simulation for a pixelated liquid-argon TPC.
//!
//! Monte-Carlo track segments go through a fixed pipeline: the current each
//! segment induces on its nearby pixels is integrated against a tabulated pad
//! response, the per-pixel contributions are accumulated while keeping track
//! of which tracks produced them, and a per-pixel self-triggering front end
//! converts the accumulated current into timestamped ADC samples.
//!
//! The entry point is [`World`]: configure it with a
//! [`DetectorConfig`](config::DetectorConfig), a
//! [`FeeConfig`](config::FeeConfig) and a
//! [`ResponseTable`](response::ResponseTable), then feed it a batch of
//! [`Segment`]s together with the candidate pixels of each segment.

use crate::config::{DetectorConfig, FeeConfig};
use crate::fee::AdcSample;
use crate::geometry::PixelId;
use crate::reduce::PixelSignals;
use crate::response::ResponseTable;
use bon::bon;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Detector and front-end configuration.
pub mod config;
/// Self-trigger and ADC emulation of the front-end electronics.
pub mod fee;
/// Pixel identifiers and pad coordinates.
pub mod geometry;
/// Induced-current integration for (segment, pixel) pairs.
pub mod induction;
/// Accumulation of per-segment waveforms onto unique pixels.
pub mod reduce;
/// Tabulated pad current response.
pub mod response;

/// The error type returned when a simulation run fails.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A pixel's front end produced more ADC samples than the configured
    /// capacity.
    #[error("pixel {} emitted more than {max} ADC samples", pixel.0)]
    AdcCapacity {
        /// The pixel whose processing was aborted.
        pixel: PixelId,
        /// The configured capacity.
        max: usize,
    },
    /// The candidate pixel lists are not parallel to the segment batch.
    #[error("{segments} segments but {candidates} candidate pixel lists")]
    BatchMismatch { segments: usize, candidates: usize },
}

/// A straight-line energy deposit produced by one simulation step of a
/// particle track.
///
/// Positions are in cm, times in microseconds and diffusion sigmas in cm.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Identifier of the originating track, used to attribute sampled charge.
    pub track_id: u32,
    pub x_start: f64,
    pub y_start: f64,
    pub z_start: f64,
    pub x_end: f64,
    pub y_end: f64,
    pub z_end: f64,
    pub t_start: f64,
    pub t_end: f64,
    /// Number of ionization electrons deposited along the segment.
    pub n_electrons: f64,
    /// Longitudinal diffusion sigma accumulated during drift.
    pub long_diff: f64,
    /// Transverse diffusion sigma accumulated during drift.
    pub tran_diff: f64,
    /// Anode plane the charge drifts towards.
    pub pixel_plane: usize,
}

/// All ADC samples emitted by one pixel, in time order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PixelReadout {
    pub pixel: PixelId,
    pub samples: Vec<AdcSample>,
}

/// A trait that defines the interface for an observer of the simulation.
///
/// The default implementation of all methods is a no-op. Users are expected to
/// override the methods they are interested in.
#[allow(unused_variables)]
pub trait Observer {
    /// Called with the induced-current waveform of every (segment, pixel)
    /// pair after the induction stage.
    fn on_waveform(&mut self, segment: usize, pixel: PixelId, waveform: &[f64]) {}
    /// Called when a pixel's discriminator crosses threshold.
    fn on_trigger(&mut self, pixel: PixelId, tick: usize) {}
    /// Called when a threshold crossing is discarded as a noise-induced false
    /// trigger.
    fn on_false_trigger(&mut self, pixel: PixelId, tick: usize) {}
    /// Called when a pixel's front end emits an ADC sample.
    fn on_adc_sample(&mut self, pixel: PixelId, sample: &AdcSample) {}
}

impl Observer for () {}

/// The full detector-response pipeline for one batch of segments.
pub struct World<O> {
    detector: DetectorConfig,
    fee: FeeConfig,
    response: ResponseTable,
    seed: u64,
    thresholds: HashMap<PixelId, f64>,
    observer: O,
}

#[bon]
impl<O> World<O> {
    #[builder]
    pub fn new(
        detector: DetectorConfig,
        fee: FeeConfig,
        response: ResponseTable,
        /// Master seed of the per-pixel noise streams.
        #[builder(default = 0)] seed: u64,
        /// Per-pixel discriminator threshold overrides. Pixels not in the map
        /// use [`FeeConfig::discrimination_threshold`].
        #[builder(default)]
        thresholds: HashMap<PixelId, f64>,
        observer: O,
    ) -> Self {
        Self {
            detector,
            fee,
            response,
            seed,
            thresholds,
            observer,
        }
    }
}

impl<O> World<O>
where
    O: Observer,
{
    /// Runs the pipeline over a batch of segments and returns the per-pixel
    /// readouts, ordered by pixel id, together with the observer.
    ///
    /// `candidates` holds, for each segment, the pixels close enough to
    /// possibly receive signal; it must be parallel to `segments`. For a
    /// fixed seed the run is deterministic.
    ///
    /// All (segment, pixel) waveforms of the batch are materialized at
    /// once. Waveforms are independent across segments, so callers bound
    /// peak memory by splitting a large batch into several smaller runs.
    pub fn run(
        mut self,
        segments: &[Segment],
        candidates: &[Vec<PixelId>],
    ) -> Result<(Vec<PixelReadout>, O), Error> {
        if segments.len() != candidates.len() {
            return Err(Error::BatchMismatch {
                segments: segments.len(),
                candidates: candidates.len(),
            });
        }

        let detector = &self.detector;
        let dt = detector.time_sampling.get();

        let windows: Vec<(f64, usize)> = segments
            .iter()
            .map(|segment| induction::time_window(segment, detector))
            .collect();
        let max_ticks = windows.iter().map(|&(_, n)| n).max().unwrap_or(0);

        let pairs: Vec<(usize, PixelId)> = candidates
            .iter()
            .enumerate()
            .flat_map(|(i, pixels)| pixels.iter().map(move |&pixel| (i, pixel)))
            .collect();
        log::info!(
            "simulating {} segments on {} (segment, pixel) pairs, {max_ticks} ticks each",
            segments.len(),
            pairs.len()
        );

        let response = &self.response;
        let waveforms: Vec<Vec<f64>> = pairs
            .par_iter()
            .map(|&(i, pixel)| {
                induction::induced_waveform(&segments[i], pixel, response, detector, max_ticks)
            })
            .collect();

        for (&(i, pixel), waveform) in pairs.iter().zip(&waveforms) {
            self.observer.on_waveform(i, pixel, waveform);
        }

        let (t_min, t_max) = detector.time_interval;
        let span_ticks = ((t_max - t_min) / dt).round().max(0.0) as usize + max_ticks + 1;
        let mut signals = PixelSignals::new(segments, candidates, span_ticks);
        for (&(i, pixel), waveform) in pairs.iter().zip(&waveforms) {
            let start_tick = ((windows[i].0 - t_min) / dt).round().max(0.0) as usize;
            signals.add(pixel, segments[i].track_id, start_tick, waveform);
        }
        log::debug!("accumulated signals on {} unique pixels", signals.len());

        let mut readouts = Vec::with_capacity(signals.len());
        for i in 0..signals.len() {
            let pixel = signals.pixels()[i];
            let mut rng =
                ChaCha8Rng::seed_from_u64(self.seed ^ pixel.0.wrapping_mul(0x9e37_79b9_7f4a_7c15));
            let threshold = self
                .thresholds
                .get(&pixel)
                .copied()
                .unwrap_or(self.fee.discrimination_threshold);

            let samples = fee::digitize_pixel(
                &self.fee,
                &self.detector,
                pixel,
                signals.total(i),
                signals.per_track(i),
                signals.tracks(i),
                threshold,
                &mut rng,
                &mut self.observer,
            )?;
            readouts.push(PixelReadout { pixel, samples });
        }

        Ok((readouts, self.observer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Positive, E_CHARGE};

    // A 10x10-pixel plane with its anode at z = 0 and a deep drift volume,
    // sampled with round numbers to keep arrival times easy to reason about.
    fn detector() -> DetectorConfig {
        DetectorConfig::builder()
            .pixel_pitch(Positive::new(0.4).unwrap())
            .n_pixels((10, 10))
            .tpc_borders(vec![[[0.0, 4.0], [0.0, 4.0], [0.0, 400.0]]])
            .v_drift(Positive::new(1.0).unwrap())
            .time_padding(2.0)
            .build()
    }

    // A response table with a single nonzero bin at dx = dy = 0, dt = 0: a
    // charge arriving on the pad center produces a unit current for one
    // response time step.
    fn single_bin_response() -> ResponseTable {
        let mut response = ResponseTable::new(
            1,
            1,
            1,
            Positive::new(0.4).unwrap(),
            Positive::new(0.05).unwrap(),
        );
        response.set(0, 0, 0, 1.0);
        response
    }

    // A short, almost-horizontal segment crossing the center of pixel
    // (5, 5), placed in z so that its whole charge cloud arrives within one
    // response time bin of a single tick.
    fn centered_segment() -> Segment {
        Segment {
            track_id: 13,
            x_start: 2.1,
            y_start: 2.2,
            z_start: 378.0835,
            x_end: 2.3,
            y_end: 2.2,
            z_end: 378.0845,
            t_start: 188.0,
            t_end: 190.5,
            n_electrons: 1000.0,
            long_diff: 0.001,
            tran_diff: 0.02,
            pixel_plane: 0,
        }
    }

    fn center_pixel() -> PixelId {
        PixelId::from_indices(5, 5, 0, (10, 10))
    }

    #[test]
    fn single_bin_waveform_collects_the_whole_deposit() {
        let detector = detector();
        let segment = centered_segment();
        let (t_start, n_ticks) = induction::time_window(&segment, &detector);

        let waveform = induction::induced_waveform(
            &segment,
            center_pixel(),
            &single_bin_response(),
            &detector,
            n_ticks,
        );

        let nonzero: Vec<usize> = waveform
            .iter()
            .enumerate()
            .filter(|(_, &v)| v != 0.0)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(nonzero.len(), 1);

        // The charge arrives at t0 just below 189 us; the matching tick is
        // the one within half a response time step of it.
        let tick_time = t_start + nonzero[0] as f64 * 0.1;
        assert!((tick_time - 189.0).abs() < 0.05);

        // The sampled charge density integrates to the full deposit, so the
        // single-bin response turns it into n_electrons * e * table value.
        let expected = 1000.0 * E_CHARGE;
        let peak = waveform[nonzero[0]];
        assert!(
            (peak - expected).abs() < 0.1 * expected,
            "peak {peak} expected around {expected}"
        );
    }

    #[derive(Default)]
    struct CountingObserver {
        waveforms: usize,
        triggers: usize,
        false_triggers: usize,
        samples: Vec<(PixelId, AdcSample)>,
    }

    impl Observer for CountingObserver {
        fn on_waveform(&mut self, _segment: usize, _pixel: PixelId, _waveform: &[f64]) {
            self.waveforms += 1;
        }

        fn on_trigger(&mut self, _pixel: PixelId, _tick: usize) {
            self.triggers += 1;
        }

        fn on_false_trigger(&mut self, _pixel: PixelId, _tick: usize) {
            self.false_triggers += 1;
        }

        fn on_adc_sample(&mut self, pixel: PixelId, sample: &AdcSample) {
            self.samples.push((pixel, sample.clone()));
        }
    }

    #[test]
    fn end_to_end_single_segment_single_sample() {
        let fee = FeeConfig::builder()
            .discrimination_threshold(5e-18)
            .reset_noise(0.0)
            .uncorrelated_noise(0.0)
            .discriminator_noise(0.0)
            .build();

        let world = World::builder()
            .detector(detector())
            .fee(fee)
            .response(single_bin_response())
            .observer(CountingObserver::default())
            .build();

        let segments = [centered_segment()];
        let candidates = vec![vec![center_pixel()]];
        let (readouts, observer) = world.run(&segments, &candidates).unwrap();

        assert_eq!(observer.waveforms, 1);
        assert_eq!(observer.triggers, 1);
        assert_eq!(observer.false_triggers, 0);
        assert_eq!(observer.samples.len(), 1);

        assert_eq!(readouts.len(), 1);
        assert_eq!(readouts[0].pixel, center_pixel());
        assert_eq!(readouts[0].samples.len(), 1);

        let sample = &readouts[0].samples[0];
        // The whole deposit is integrated in one tick of current.
        let expected = 1000.0 * E_CHARGE * 0.1;
        assert!((sample.charge - expected).abs() < 0.1 * expected);
        // Crossing at 189 us, plus the time padding and the two-tick
        // registration delay.
        assert!((sample.timestamp - 193.0).abs() < 1e-6);
        assert_eq!(sample.fractions, vec![(13, 1.0)]);
    }

    #[test]
    fn threshold_overrides_apply_per_pixel() {
        // The default threshold is far above this deposit; only the override
        // lets the pixel trigger.
        let mut thresholds = HashMap::new();
        thresholds.insert(center_pixel(), 5e-18);

        let world = World::builder()
            .detector(detector())
            .fee(FeeConfig::noiseless())
            .response(single_bin_response())
            .thresholds(thresholds)
            .observer(())
            .build();

        let segments = [centered_segment()];
        let candidates = vec![vec![center_pixel()]];
        let (readouts, ()) = world.run(&segments, &candidates).unwrap();
        assert_eq!(readouts[0].samples.len(), 1);

        // Without the override, nothing crosses.
        let world = World::builder()
            .detector(detector())
            .fee(FeeConfig::noiseless())
            .response(single_bin_response())
            .observer(())
            .build();
        let (readouts, ()) = world.run(&segments, &candidates).unwrap();
        assert!(readouts[0].samples.is_empty());
    }

    #[test]
    fn identical_seeds_reproduce_the_run() {
        let run = || {
            let fee = FeeConfig::builder().discrimination_threshold(5e-18).build();
            let world = World::builder()
                .detector(detector())
                .fee(fee)
                .response(single_bin_response())
                .seed(271828)
                .observer(())
                .build();

            let segments = [centered_segment()];
            let candidates = vec![vec![center_pixel()]];
            let (readouts, ()) = world.run(&segments, &candidates).unwrap();
            readouts
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn shared_pixel_splits_fractions_between_tracks() {
        let fee = FeeConfig::builder()
            .discrimination_threshold(5e-18)
            .reset_noise(0.0)
            .uncorrelated_noise(0.0)
            .discriminator_noise(0.0)
            .build();

        let world = World::builder()
            .detector(detector())
            .fee(fee)
            .response(single_bin_response())
            .observer(())
            .build();

        // Two identical deposits from different tracks on the same pixel.
        let mut second = centered_segment();
        second.track_id = 21;
        let segments = [centered_segment(), second];
        let candidates = vec![vec![center_pixel()], vec![center_pixel()]];

        let (readouts, ()) = world.run(&segments, &candidates).unwrap();
        assert_eq!(readouts.len(), 1);
        assert_eq!(readouts[0].samples.len(), 1);

        let fractions = &readouts[0].samples[0].fractions;
        assert_eq!(fractions.len(), 2);
        assert_eq!(fractions[0].0, 13);
        assert_eq!(fractions[1].0, 21);
        assert!((fractions[0].1 - 0.5).abs() < 1e-9);
        assert!((fractions[1].1 - 0.5).abs() < 1e-9);
    }

    #[test]
    fn mismatched_batches_are_rejected() {
        let world = World::builder()
            .detector(detector())
            .fee(FeeConfig::noiseless())
            .response(single_bin_response())
            .observer(())
            .build();

        let segments = [centered_segment()];
        let result = world.run(&segments, &[]);
        assert!(matches!(
            result,
            Err(Error::BatchMismatch {
                segments: 1,
                candidates: 0
            })
        ));
    }

    #[test]
    fn records_round_trip_through_json() {
        let segment = centered_segment();
        let json = serde_json::to_string(&segment).unwrap();
        assert_eq!(serde_json::from_str::<Segment>(&json).unwrap(), segment);

        let sample = AdcSample {
            charge: 1.5e-17,
            adc: 94,
            timestamp: 193.0,
            fractions: vec![(13, 0.75), (21, 0.25)],
        };
        let json = serde_json::to_string(&sample).unwrap();
        assert_eq!(serde_json::from_str::<AdcSample>(&json).unwrap(), sample);
    }
}
