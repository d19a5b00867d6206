use crate::geometry::PixelId;
use crate::Segment;
use std::collections::HashMap;

/// Maximum number of distinct tracks whose contributions are attributed per
/// pixel. Contributions beyond this limit are dropped from the per-track
/// breakdown (the total still accumulates them).
pub const MAX_TRACKS_PER_PIXEL: usize = 5;

/// Accumulated per-pixel waveforms for one batch of segments, with a
/// per-track breakdown of the current at every tick.
///
/// Pixels are deduplicated across all segments' candidate lists and kept in
/// ascending id order. Each unique pixel owns a bounded row of track ids; a
/// track's slot in that row indexes its share of the accumulated current.
#[derive(Clone, Debug)]
pub struct PixelSignals {
    pixels: Vec<PixelId>,
    index: HashMap<PixelId, usize>,
    tracks: Vec<Vec<u32>>,
    n_ticks: usize,
    total: Vec<Vec<f64>>,
    per_track: Vec<Vec<[f64; MAX_TRACKS_PER_PIXEL]>>,
}

impl PixelSignals {
    /// Builds the unique-pixel set and the per-pixel track rows for a batch,
    /// allocating `n_ticks` of waveform per unique pixel.
    ///
    /// `candidates` holds, for each segment, the pixels it may induce signal
    /// on; it must be parallel to `segments`.
    pub fn new(segments: &[Segment], candidates: &[Vec<PixelId>], n_ticks: usize) -> Self {
        let mut pixels: Vec<PixelId> = candidates.iter().flatten().copied().collect();
        pixels.sort_unstable();
        pixels.dedup();

        let index: HashMap<PixelId, usize> =
            pixels.iter().enumerate().map(|(i, &p)| (p, i)).collect();

        let mut tracks = vec![Vec::new(); pixels.len()];
        for (segment, pixel_list) in segments.iter().zip(candidates) {
            for pixel in pixel_list {
                let row: &mut Vec<u32> = &mut tracks[index[pixel]];
                if !row.contains(&segment.track_id) && row.len() < MAX_TRACKS_PER_PIXEL {
                    row.push(segment.track_id);
                }
            }
        }

        let total = vec![vec![0.0; n_ticks]; pixels.len()];
        let per_track = vec![vec![[0.0; MAX_TRACKS_PER_PIXEL]; n_ticks]; pixels.len()];

        Self {
            pixels,
            index,
            tracks,
            n_ticks,
            total,
            per_track,
        }
    }

    /// Adds one (segment, pixel) waveform at the given absolute start tick.
    ///
    /// The total always accumulates; the per-track share only does when the
    /// track holds a slot in the pixel's row. Ticks beyond the allocated
    /// buffer are discarded.
    pub fn add(&mut self, pixel: PixelId, track_id: u32, start_tick: usize, waveform: &[f64]) {
        let Some(&pi) = self.index.get(&pixel) else {
            return;
        };
        let slot = self.tracks[pi].iter().position(|&t| t == track_id);

        for (k, &value) in waveform.iter().enumerate() {
            let tick = start_tick + k;
            if tick >= self.n_ticks {
                break;
            }
            self.total[pi][tick] += value;
            if let Some(slot) = slot {
                self.per_track[pi][tick][slot] += value;
            }
        }
    }

    /// Number of unique pixels in the batch.
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    /// Returns `true` if no candidate pixels were provided.
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// The unique pixels, in ascending id order.
    pub fn pixels(&self) -> &[PixelId] {
        &self.pixels
    }

    /// The accumulated waveform of the `i`-th unique pixel.
    pub fn total(&self, i: usize) -> &[f64] {
        &self.total[i]
    }

    /// The per-track current shares of the `i`-th unique pixel, one row of
    /// [`MAX_TRACKS_PER_PIXEL`] slots per tick.
    pub fn per_track(&self, i: usize) -> &[[f64; MAX_TRACKS_PER_PIXEL]] {
        &self.per_track[i]
    }

    /// The track ids holding slots on the `i`-th unique pixel.
    pub fn tracks(&self, i: usize) -> &[u32] {
        &self.tracks[i]
    }
}
