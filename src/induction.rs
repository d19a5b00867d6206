use crate::config::{DetectorConfig, E_CHARGE};
use crate::geometry::{self, PixelId};
use crate::response::ResponseTable;
use crate::Segment;
use std::f64::consts::PI;

/// Returns the clipped, grid-aligned start time of a segment's signal window
/// and the number of time ticks the window spans.
///
/// Both window edges are clipped to the detector's valid time interval and
/// rounded to the nearest multiple of the sampling period; clipping saturates
/// rather than failing. The maximum tick count across a batch of segments
/// determines the waveform length allocated per (segment, pixel) pair.
pub fn time_window(segment: &Segment, detector: &DetectorConfig) -> (f64, usize) {
    let dt = detector.time_sampling.get();
    let (t_min, t_max) = detector.time_interval;

    let t_end = t_max.min(((segment.t_end + 1.0) / dt).round() * dt);
    let t_start = t_min.max(((segment.t_start - detector.time_padding) / dt).round() * dt);
    let n_ticks = ((t_end - t_start) / dt).ceil().max(0.0) as usize;

    (t_start, n_ticks)
}

// Abramowitz and Stegun 7.1.26, maximum error 1.5e-7.
fn erf(x: f64) -> f64 {
    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;
    const P: f64 = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + P * x);
    let poly = ((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t;

    sign * (1.0 - poly * (-x * x).exp())
}

fn sign(x: f64) -> f64 {
    if x >= 0.0 {
        1.0
    } else {
        -1.0
    }
}

/// Deposited-charge density at `point` for a line source of total charge `q`
/// between `start` and `start + segment`, spread by the Gaussian `sigmas`
/// along the three axes.
///
/// The closed form combines an exponential with the difference of two error
/// functions (the analytic integral of the Gaussian along the line source).
/// Underflowing factors yield exactly zero instead of NaN or infinity.
pub fn charge_density(
    point: [f64; 3],
    q: f64,
    start: [f64; 3],
    sigmas: [f64; 3],
    segment: [f64; 3],
) -> f64 {
    let delta_r = (segment[0].powi(2) + segment[1].powi(2) + segment[2].powi(2)).sqrt();
    if delta_r == 0.0 || sigmas.iter().any(|&s| s <= 0.0) {
        return 0.0;
    }

    let a = (segment[0] / delta_r).powi(2) / (2.0 * sigmas[0] * sigmas[0])
        + (segment[1] / delta_r).powi(2) / (2.0 * sigmas[1] * sigmas[1])
        + (segment[2] / delta_r).powi(2) / (2.0 * sigmas[2] * sigmas[2]);
    let factor = q / delta_r / (sigmas[0] * sigmas[1] * sigmas[2] * (8.0 * PI * PI * PI).sqrt());
    let sqrt_a_2 = 2.0 * a.sqrt();

    let b = -((point[0] - start[0]) / (sigmas[0] * sigmas[0]) * (segment[0] / delta_r)
        + (point[1] - start[1]) / (sigmas[1] * sigmas[1]) * (segment[1] / delta_r)
        + (point[2] - start[2]) / (sigmas[2] * sigmas[2]) * (segment[2] / delta_r));

    let delta = (point[0] - start[0]).powi(2) / (2.0 * sigmas[0] * sigmas[0])
        + (point[1] - start[1]).powi(2) / (2.0 * sigmas[1] * sigmas[1])
        + (point[2] - start[2]).powi(2) / (2.0 * sigmas[2] * sigmas[2]);

    let integral =
        PI.sqrt() * (-erf(b / sqrt_a_2) + erf((b + 2.0 * a * delta_r) / sqrt_a_2)) / sqrt_a_2;

    if factor > 0.0 && integral > 0.0 {
        let density = (b * b / (4.0 * a) - delta + factor.ln() + integral.ln()).exp();
        if density.is_finite() {
            density
        } else {
            0.0
        }
    } else {
        0.0
    }
}

/// Drift-coordinate interval of a segment within `tolerance` of a pixel
/// center.
#[derive(Clone, Copy, Debug)]
pub struct DriftSlice {
    /// Drift coordinate of the point of closest approach.
    pub z_poca: f64,
    /// Drift coordinate of the first slice.
    pub z_min: f64,
    /// Drift coordinate of the last slice.
    pub z_max: f64,
}

/// Computes the point of closest approach between a segment and the pixel
/// center at `(x_p, y_p)` in the transverse plane, and the drift-coordinate
/// slice within `tolerance` of that pixel.
///
/// Returns [`None`] when the distance of closest approach exceeds the
/// tolerance. A segment with coincident start and end `x` coordinates also
/// returns [`None`]: a perfectly vertical segment induces no signal at all.
pub fn drift_slice(
    start_point: [f64; 3],
    end_point: [f64; 3],
    x_p: f64,
    y_p: f64,
    tolerance: f64,
) -> Option<DriftSlice> {
    let (start, end) = if start_point[0] > end_point[0] {
        (end_point, start_point)
    } else if start_point[0] < end_point[0] {
        (start_point, end_point)
    } else {
        return None;
    };

    let (xs, ys) = (start[0], start[1]);
    let (xe, ye) = (end[0], end[1]);

    let m = (ye - ys) / (xe - xs);
    let q = (xe * ys - xs * ye) / (xe - xs);

    let (a, b, c) = (m, -1.0, q);

    let mut x_poca = (b * (b * x_p - a * y_p) - a * c) / (a * a + b * b);

    let length = ((end[0] - start[0]).powi(2)
        + (end[1] - start[1]).powi(2)
        + (end[2] - start[2]).powi(2))
    .sqrt();
    let dir = [
        (end[0] - start[0]) / length,
        (end[1] - start[1]) / length,
        (end[2] - start[2]) / length,
    ];

    let doca = if x_poca < start[0] {
        x_poca = start[0];
        ((x_p - start[0]).powi(2) + (y_p - start[1]).powi(2)).sqrt()
    } else if x_poca > end[0] {
        x_poca = end[0];
        ((x_p - end[0]).powi(2) + (y_p - end[1]).powi(2)).sqrt()
    } else {
        (a * x_p + b * y_p + c).abs() / (a * a + b * b).sqrt()
    };

    let z_poca = start[2] + (x_poca - start[0]) / dir[0] * dir[2];

    if tolerance > doca {
        let length_2d = ((xe - xs).powi(2) + (ye - ys).powi(2)).sqrt();
        let dir_2d = (end[0] - start[0]) / length_2d;
        // Length along the track, in 2D, of the tolerance range.
        let delta_l_2d = (tolerance * tolerance - doca * doca).sqrt();

        let x_plus = x_poca + delta_l_2d * dir_2d;
        let x_minus = x_poca - delta_l_2d * dir_2d;
        let plus_l = (x_plus - start[0]) / dir[0];
        let minus_l = (x_minus - start[0]) / dir[0];

        let plus_z = start[2] + dir[2] * plus_l;
        let minus_z = start[2] + dir[2] * minus_l;

        Some(DriftSlice {
            z_poca,
            z_min: minus_z.min(plus_z),
            z_max: minus_z.max(plus_z),
        })
    } else {
        None
    }
}

// Transverse coordinates of the track at drift coordinate `z`.
fn track_point(start: [f64; 3], direction: [f64; 3], z: f64) -> (f64, f64) {
    let l = (z - start[2]) / direction[2];
    (start[0] + l * direction[0], start[1] + l * direction[1])
}

/// Spatial tolerance used to decide whether a pixel is close enough to a
/// segment to receive any signal: the 5-sigma transverse diffusion spread or,
/// if larger, half the diagonal of the pixel pad, doubled.
pub fn impact_factor(tran_diff: f64, pixel_pitch: f64) -> f64 {
    let diffusion = ((5.0 * tran_diff).powi(2) + (5.0 * tran_diff).powi(2)).sqrt();
    let half_diagonal = (pixel_pitch * pixel_pitch + pixel_pitch * pixel_pitch).sqrt() / 2.0;

    diffusion.max(half_diagonal) * 2.0
}

/// Computes the current induced by `segment` on `pixel`, one value per time
/// tick of the segment's signal window.
///
/// The charge cloud around the segment is sampled on a bounded 3D grid; each
/// sample is weighted by the tabulated pad response for its transverse offset
/// and drift arrival time. Pixels entirely outside the segment's impact
/// tolerance get an all-zero waveform, as do segments on an unknown anode
/// plane or with degenerate geometry. NaN currents are clamped to zero.
pub fn induced_waveform(
    segment: &Segment,
    pixel: PixelId,
    response: &ResponseTable,
    detector: &DetectorConfig,
    n_ticks: usize,
) -> Vec<f64> {
    let mut current = vec![0.0; n_ticks];

    let Some((x_p, y_p)) = geometry::pixel_center(pixel, detector) else {
        log::warn!("pixel id {} is not on any known plane", pixel.0);
        return current;
    };
    let Some(anode_z) = detector.anode_z(segment.pixel_plane) else {
        log::warn!(
            "segment of track {} sits on unknown plane {}",
            segment.track_id,
            segment.pixel_plane
        );
        return current;
    };

    let (start, end) = if segment.z_start < segment.z_end {
        (
            [segment.x_start, segment.y_start, segment.z_start],
            [segment.x_end, segment.y_end, segment.z_end],
        )
    } else {
        (
            [segment.x_end, segment.y_end, segment.z_end],
            [segment.x_start, segment.y_start, segment.z_start],
        )
    };

    let seg = [end[0] - start[0], end[1] - start[1], end[2] - start[2]];
    let length = (seg[0].powi(2) + seg[1].powi(2) + seg[2].powi(2)).sqrt();
    if length == 0.0 {
        return current;
    }
    let direction = [seg[0] / length, seg[1] / length, seg[2] / length];
    let sigmas = [segment.tran_diff, segment.tran_diff, segment.long_diff];

    let pitch = detector.pixel_pitch.get();
    let tolerance = impact_factor(segment.tran_diff, pitch);

    let Some(slice) = drift_slice(start, end, x_p, y_p, tolerance) else {
        return current;
    };

    let z_start_int = slice.z_min - 4.0 * sigmas[2];
    let z_end_int = slice.z_max + 4.0 * sigmas[2];

    let (x_start, y_start) = track_point(start, direction, slice.z_min);
    let (x_end, y_end) = track_point(start, direction, slice.z_max);

    // A sampling grid needs at least two points per axis.
    let n_points = detector.sampled_points.max(2);
    let x_step = ((x_end - x_start).abs() + 8.0 * sigmas[0]) / (n_points - 1) as f64;
    let y_step = ((y_end - y_start).abs() + 8.0 * sigmas[1]) / (n_points - 1) as f64;

    let dt = detector.time_sampling.get();
    let z_sampling = dt / 2.0;
    let z_steps = n_points.max(((z_end_int - z_start_int).abs() / z_sampling).ceil() as usize);
    let z_step = (z_end_int - z_start_int) / (z_steps - 1) as f64;

    let (t_start, _) = time_window(segment, detector);
    let v_drift = detector.v_drift.get();
    let time_window = detector.time_window;

    for (it, tick_current) in current.iter_mut().enumerate() {
        let time_tick = t_start + it as f64 * dt;
        let mut total = 0.0;

        for iz in 0..z_steps {
            let z = z_start_int + iz as f64 * z_step;
            let t0 = (z - anode_z).abs() / v_drift - time_window;

            // The charge in this slice only induces current while it is
            // within the response window of its own arrival time.
            if !(t0 < time_tick && time_tick < t0 + time_window) {
                continue;
            }

            for ix in 0..n_points {
                let x = x_start + sign(direction[0]) * (ix as f64 * x_step - 4.0 * sigmas[0]);
                let x_dist = (x_p - x).abs();

                if x_dist > pitch / 2.0 + pitch / 4.0 {
                    continue;
                }

                for iy in 0..n_points {
                    let y = y_start + sign(direction[1]) * (iy as f64 * y_step - 4.0 * sigmas[1]);
                    let y_dist = (y_p - y).abs();

                    if y_dist > pitch / 2.0 + pitch / 4.0 {
                        continue;
                    }

                    let charge =
                        charge_density([x, y, z], segment.n_electrons, start, sigmas, seg)
                            * x_step.abs()
                            * y_step.abs()
                            * z_step.abs();

                    total +=
                        response.value_at(x_dist, y_dist, time_tick - t0) * charge * E_CHARGE;
                }
            }
        }

        *tick_current = if total.is_nan() { 0.0 } else { total };
    }

    current
}
