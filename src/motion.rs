//! Wandering movement driven by coherent noise.

use noise::{NoiseFn, Perlin};
use rand::Rng;

/// Offset increments applied on every call to [`MotionField::advance`].
const OFFSET_STEP: [f64; 2] = [0.005, 0.004];

/// Shift applied to the second noise sample to decorrelate the two axes.
const AXIS_SHIFT: [f64; 2] = [10.3, 5.7];

/// Per-agent heading generator.
///
/// Samples a Perlin noise field along a slowly drifting offset, so that
/// consecutive headings change smoothly but unpredictably.
#[derive(Clone)]
pub struct MotionField {
    noise: Perlin,
    offset: [f64; 2],
}

impl MotionField {
    /// Create a field with a random noise seed and random starting offsets.
    pub fn new<R: Rng>(rng: &mut R) -> Self {
        Self {
            noise: Perlin::new(rng.random()),
            offset: [rng.random_range(0.0..1000.0), rng.random_range(0.0..1000.0)],
        }
    }

    /// Advance the offset and return the displacement for this step.
    ///
    /// The heading is normalized to unit length and scaled by `speed * elapsed`.
    /// A zero-magnitude sample yields no displacement.
    pub fn advance(&mut self, speed: f64, elapsed: f64) -> (f64, f64) {
        self.offset[0] += OFFSET_STEP[0];
        self.offset[1] += OFFSET_STEP[1];

        let [x, y] = self.offset;
        let noise_x = self.noise.get([x, y]);
        let noise_y = self.noise.get([x + AXIS_SHIFT[0], y + AXIS_SHIFT[1]]);

        let magnitude = noise_x.hypot(noise_y);
        if magnitude > 0.0 {
            let scale = speed * elapsed / magnitude;
            (noise_x * scale, noise_y * scale)
        } else {
            (0.0, 0.0)
        }
    }
}

/// Flip the sign of `delta` so that a circle of `radius` at `pos` moves
/// away from the walls at `0` and `bound`.
///
/// Only the direction changes, never the magnitude.
pub fn reflect(pos: f64, delta: f64, radius: f64, bound: f64) -> f64 {
    if pos + delta - radius < 0.0 {
        delta.abs()
    } else if pos + delta + radius > bound {
        -delta.abs()
    } else {
        delta
    }
}

/// Apply a reflected displacement and keep the circle inside `[radius, bound - radius]`.
///
/// The clamp only matters when a single displacement is larger than the arena.
pub fn displace(pos: f64, delta: f64, radius: f64, bound: f64) -> f64 {
    let delta = reflect(pos, delta, radius, bound);
    (pos + delta).clamp(radius, bound - radius)
}
