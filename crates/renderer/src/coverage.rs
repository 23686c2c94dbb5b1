use std::ops::Range;

use tiles::LocalDab;

/// Coverage of a dab at distance `dist` from its center.
///
/// Mirrors `dab_coverage` in the blend shaders: a one pixel anti-aliased rim,
/// shaped by a smoothstep falloff from `radius * hardness` when
/// `hardness < 1`.
pub fn dab_coverage(dist: f32, radius: f32, hardness: f32) -> f32 {
    let edge = (radius + 0.5 - dist).clamp(0.0, 1.0);
    if hardness >= 1.0 {
        return edge;
    }
    let inner = radius * hardness;
    let t = ((dist - inner) / (radius - inner)).clamp(0.0, 1.0);
    let smooth = t * t * (3.0 - 2.0 * t);
    edge * (1.0 - smooth)
}

/// Splits `dabs` into maximal runs of identical color.
///
/// Runs stay in submission order, so a backend that switches state per run
/// composites exactly as if it walked the dabs one by one.
pub fn color_runs(dabs: &[LocalDab]) -> Vec<Range<usize>> {
    let mut runs = Vec::new();
    let mut start = 0;
    for index in 1..=dabs.len() {
        if index == dabs.len() || dabs[index].color != dabs[start].color {
            if start < index {
                runs.push(start..index);
            }
            start = index;
        }
    }
    runs
}
