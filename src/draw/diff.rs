use crate::draw::snapshot::{CanvasSnapshot, Color, FrameBuffer};
use std::cmp::Reverse;

/// Channel-wise slack under the threshold policy. A pixel whose every channel
/// differs by more than this is considered wrong.
pub const RGB_LENIENCE: u8 = 30;

/// How canvas pixels are compared against the target frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq, clap::ValueEnum)]
pub enum DiffPolicy {
    /// Skip pixels that are "close enough": only correct a pixel when all
    /// three channels differ by more than the lenience constant.
    Threshold,
    /// Correct every pixel that differs at all, worst offenders first.
    Ranked,
}

impl DiffPolicy {
    /// Whether a pixel currently showing `current` needs to be rewritten to
    /// `wanted`. The draw loop re-applies this right before each write.
    pub fn needs_change(self, current: Color, wanted: Color) -> bool {
        match self {
            DiffPolicy::Threshold => {
                channel_diff(current.r, wanted.r) > RGB_LENIENCE as u16
                    && channel_diff(current.g, wanted.g) > RGB_LENIENCE as u16
                    && channel_diff(current.b, wanted.b) > RGB_LENIENCE as u16
            }
            DiffPolicy::Ranked => current != wanted,
        }
    }
}

fn channel_diff(a: u8, b: u8) -> u16 {
    (a as i16 - b as i16).unsigned_abs()
}

/// Mean absolute channel difference, rounded. Used as the ordering key for
/// the ranked policy: larger means more visually wrong.
pub fn magnitude(a: Color, b: Color) -> u32 {
    let sum = channel_diff(a.r, b.r) + channel_diff(a.g, b.g) + channel_diff(a.b, b.b);
    (sum as f64 / 3.0).round() as u32
}

/// Scans the frame's full width x height footprint against the snapshot and
/// returns the absolute canvas coordinates that need correction.
///
/// Under `Ranked` the result is ordered from largest difference magnitude to
/// smallest, scan order within equal magnitudes. `Threshold` carries no
/// ordering guarantee beyond the scan itself.
pub fn coords_to_draw(
    snapshot: &CanvasSnapshot,
    frame: &FrameBuffer,
    start_x: u32,
    start_y: u32,
    policy: DiffPolicy,
) -> Vec<(u32, u32)> {
    match policy {
        DiffPolicy::Threshold => {
            let mut coords = Vec::new();
            for y in 0..frame.height() {
                for x in 0..frame.width() {
                    let current = snapshot.pixel(start_x + x, start_y + y);
                    let wanted = frame.pixel(x, y);
                    if policy.needs_change(current, wanted) {
                        coords.push((start_x + x, start_y + y));
                    }
                }
            }
            coords
        }
        DiffPolicy::Ranked => {
            let mut entries = Vec::new();
            for y in 0..frame.height() {
                for x in 0..frame.width() {
                    let current = snapshot.pixel(start_x + x, start_y + y);
                    let wanted = frame.pixel(x, y);
                    if current != wanted {
                        entries.push(((start_x + x, start_y + y), magnitude(current, wanted)));
                    }
                }
            }
            // Stable sort keeps scan order within a magnitude bucket.
            entries.sort_by_key(|&(_, mag)| Reverse(mag));
            entries.into_iter().map(|(coord, _)| coord).collect()
        }
    }
}
