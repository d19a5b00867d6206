use bon::Builder;
use num_traits::Zero;

/// Charge of a single electron in coulomb.
pub const E_CHARGE: f64 = 1.602e-19;

/// A value that is guaranteed to be strictly greater than zero.
///
/// # Examples
///
/// ```
/// use pixsim::config::Positive;
///
/// assert!(Positive::new(0.1).is_some());
/// assert!(Positive::new(0.0).is_none());
/// assert!(Positive::new(-1.0).is_none());
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Positive<T>(T);

impl<T> Positive<T>
where
    T: PartialOrd + Zero,
{
    /// Creates a new [`Positive`] value. Returns [`None`] if the input is not
    /// strictly greater than zero.
    pub fn new(value: T) -> Option<Self> {
        (value > T::zero()).then_some(Self(value))
    }
}

impl<T> Positive<T> {
    /// Returns a reference to the inner value.
    pub fn inner(&self) -> &T {
        &self.0
    }
}

impl<T: Copy> Positive<T> {
    /// Returns the inner value.
    pub fn get(&self) -> T {
        self.0
    }
}

/// Static detector geometry and transport properties.
///
/// All lengths are in cm, all times in microseconds. The defaults match a
/// single-plane pixelated LArTPC with LArPix-scale readout.
///
/// # Examples
///
/// ```
/// use pixsim::config::DetectorConfig;
///
/// let detector = DetectorConfig::builder().build();
/// assert_eq!(detector.sampled_points, 40);
/// ```
#[derive(Builder, Clone, Debug)]
pub struct DetectorConfig {
    /// Distance between adjacent pixel centers.
    #[builder(default = Positive::new(0.4434).unwrap())]
    pub pixel_pitch: Positive<f64>,
    /// Time between two consecutive waveform ticks.
    #[builder(default = Positive::new(0.1).unwrap())]
    pub time_sampling: Positive<f64>,
    /// Time added in front of a segment's start time when computing its
    /// signal window.
    #[builder(default = 190.0)]
    pub time_padding: f64,
    /// Length of the induced-current window after the charge arrives at the
    /// anode.
    #[builder(default = 189.1)]
    pub time_window: f64,
    /// Valid simulation time interval. Segment windows are clipped to it.
    #[builder(default = (0.0, 200.0))]
    pub time_interval: (f64, f64),
    /// Electron drift velocity.
    #[builder(default = Positive::new(0.1648).unwrap())]
    pub v_drift: Positive<f64>,
    /// Number of charge samples per transverse axis when integrating a
    /// segment.
    #[builder(default = 40)]
    pub sampled_points: usize,
    /// Number of pixels per plane along x and y. Determines the pixel id
    /// encoding.
    #[builder(default = (256, 256))]
    pub n_pixels: (u64, u64),
    /// Per-plane borders as `[[x_min, x_max], [y_min, y_max], [z_min, z_max]]`.
    /// The anode of a plane sits at `borders[2][0]`.
    #[builder(default = vec![[[0.0, 113.5], [0.0, 113.5], [0.0, 50.0]]])]
    pub tpc_borders: Vec<[[f64; 2]; 3]>,
}

impl DetectorConfig {
    /// Returns the drift coordinate of the anode for the given plane, or
    /// [`None`] for an unknown plane.
    pub fn anode_z(&self, plane: usize) -> Option<f64> {
        self.tpc_borders.get(plane).map(|b| b[2][0])
    }
}

/// Front-end electronics constants.
///
/// Charges are in coulomb, voltages in mV, noise amplitudes in electrons and
/// delays in clock cycles.
#[derive(Builder, Clone, Debug)]
pub struct FeeConfig {
    /// Maximum number of ADC samples a single pixel may emit in one run.
    #[builder(default = 10)]
    pub max_adc_values: usize,
    /// Default discriminator threshold, in coulomb.
    #[builder(default = 7e3 * E_CHARGE)]
    pub discrimination_threshold: f64,
    /// ADC hold delay in clock cycles.
    #[builder(default = 15.0)]
    pub adc_hold_delay: f64,
    /// ADC busy delay in clock cycles.
    #[builder(default = 8.0)]
    pub adc_busy_delay: f64,
    /// Reset time in clock cycles.
    #[builder(default = 1.0)]
    pub reset_cycles: f64,
    /// Clock cycle period in microseconds.
    #[builder(default = Positive::new(0.1).unwrap())]
    pub clock_cycle: Positive<f64>,
    /// Front-end gain in mV per electron.
    #[builder(default = 4.0 / 1e3)]
    pub gain: f64,
    /// Buffer risetime in microseconds. Set greater than zero to low-pass
    /// filter the raw current through an exponential buffer response.
    #[builder(default = 0.0)]
    pub buffer_risetime: f64,
    /// Common-mode voltage.
    #[builder(default = 288.0)]
    pub v_cm: f64,
    /// Reference voltage.
    #[builder(default = 1300.0)]
    pub v_ref: f64,
    /// Pedestal voltage.
    #[builder(default = 580.0)]
    pub v_pedestal: f64,
    /// Number of ADC counts.
    #[builder(default = 256)]
    pub adc_counts: u32,
    /// Reset noise in electrons.
    #[builder(default = 900.0)]
    pub reset_noise: f64,
    /// Uncorrelated noise in electrons.
    #[builder(default = 500.0)]
    pub uncorrelated_noise: f64,
    /// Discriminator noise in electrons.
    #[builder(default = 650.0)]
    pub discriminator_noise: f64,
}

impl FeeConfig {
    /// A configuration with every noise amplitude set to zero. Useful to make
    /// the front end deterministic independently of the seed.
    pub fn noiseless() -> Self {
        Self::builder()
            .reset_noise(0.0)
            .uncorrelated_noise(0.0)
            .discriminator_noise(0.0)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_rejects_non_positive() {
        assert_eq!(Positive::new(1.5).map(|p| p.get()), Some(1.5));
        assert!(Positive::new(0.0f64).is_none());
        assert!(Positive::new(-0.1f64).is_none());
        assert!(Positive::new(f64::NAN).is_none());
    }

    #[test]
    fn detector_defaults() {
        let detector = DetectorConfig::builder().build();
        assert_eq!(detector.pixel_pitch.get(), 0.4434);
        assert_eq!(detector.time_sampling.get(), 0.1);
        assert_eq!(detector.anode_z(0), Some(0.0));
        assert_eq!(detector.anode_z(1), None);
    }

    #[test]
    fn fee_defaults() {
        let fee = FeeConfig::builder().build();
        assert_eq!(fee.max_adc_values, 10);
        assert_eq!(fee.adc_counts, 256);
        assert!(fee.discrimination_threshold > 0.0);

        let quiet = FeeConfig::noiseless();
        assert_eq!(quiet.reset_noise, 0.0);
        assert_eq!(quiet.uncorrelated_noise, 0.0);
        assert_eq!(quiet.discriminator_noise, 0.0);
    }
}
