// src/analysis/vehicle_tracker.rs
//
// Two-frame correspondence tracker. The captures are seconds apart, so a
// vehicle may move a large distance between them and small-displacement
// association (IoU, nearest centroid in the image) does not work.
//
// Design:
//   - Lane gating: a frame-1 centroid outside every lane is never tracked,
//     and pairs never cross lanes
//   - Direction gating: the frame-2 position must lie downstream along the
//     lane's travel axis, within [min, max] axial displacement
//   - Vehicles in one lane cannot pass each other, so pairs are
//     order-preserving along the axis (no crossings)
//   - Among non-crossing pairings, maximise the number of pairs, then
//     minimise total axial displacement (nearest neighbour along the lane)
//   - Remaining ties resolve to the earliest detection indices
//
// Solved per lane with an O(n*m) dynamic program over the axis-sorted
// detections, the same recurrence as a sequence alignment.

use crate::lane_model::{Lane, LaneSet};
use crate::types::{Centroid, FrameSize, LaneId, TrackingConfig};
use serde::Serialize;
use std::cmp::Ordering;
use tracing::{debug, info};

// ============================================================================
// TYPES
// ============================================================================

/// A frame-1 detection paired with its frame-2 counterpart
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedVehicle {
    pub id: u32,
    pub lane: LaneId,
    pub first: Centroid,
    pub second: Centroid,
    /// Displacement along the lane's travel axis, pixels, never negative
    pub axial_displacement_px: f32,
    pub elapsed_seconds: f64,
}

/// A frame-1 detection that could not be paired
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UntrackedDetection {
    pub centroid: Centroid,
    /// `None` when the point lies outside every lane
    pub lane: Option<LaneId>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TrackingOutcome {
    pub tracked: Vec<TrackedVehicle>,
    pub untracked: Vec<UntrackedDetection>,
}

/// Detection of one frame projected onto a lane axis
#[derive(Debug, Clone, Copy)]
struct AxisEntry {
    index: usize,
    pos: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Step {
    SkipFirst,
    SkipSecond,
    Pair,
}

/// (pairs, total displacement) of the best pairing of a suffix
#[derive(Debug, Clone, Copy)]
struct Score {
    pairs: usize,
    cost: f64,
}

impl Score {
    const EMPTY: Score = Score {
        pairs: 0,
        cost: 0.0,
    };

    fn beats(&self, other: &Score) -> bool {
        self.pairs > other.pairs || (self.pairs == other.pairs && self.cost < other.cost)
    }
}

// ============================================================================
// MAIN TRACKER
// ============================================================================

pub struct VehicleTracker {
    pub config: TrackingConfig,
    frame: FrameSize,
}

impl VehicleTracker {
    pub fn new(config: TrackingConfig, frame: FrameSize) -> Self {
        Self { config, frame }
    }

    /// Pair frame-1 detections with frame-2 detections.
    /// An empty frame is a valid observation and yields no pairs.
    pub fn track(
        &self,
        first: &[Centroid],
        second: &[Centroid],
        lanes: &LaneSet,
        elapsed_seconds: f64,
    ) -> TrackingOutcome {
        let lanes_first: Vec<Option<LaneId>> = first.iter().map(|c| self.lane_for(c, lanes)).collect();

        if first.is_empty() || second.is_empty() {
            info!(
                "Tracking skipped: frame sizes {} / {}",
                first.len(),
                second.len()
            );
            return TrackingOutcome {
                tracked: Vec::new(),
                untracked: first
                    .iter()
                    .zip(&lanes_first)
                    .map(|(c, lane)| UntrackedDetection {
                        centroid: *c,
                        lane: *lane,
                    })
                    .collect(),
            };
        }

        let lanes_second: Vec<Option<LaneId>> =
            second.iter().map(|c| self.lane_for(c, lanes)).collect();

        let mut paired_first = vec![false; first.len()];
        let mut pairs: Vec<(usize, usize, LaneId, f32)> = Vec::new();

        for lane in lanes.lanes() {
            let a = axis_entries(first, &lanes_first, lane);
            let b = axis_entries(second, &lanes_second, lane);
            if a.is_empty() || b.is_empty() {
                continue;
            }

            for (i, j) in self.align(&a, &b) {
                let disp = lane.project(second[j].point()) - lane.project(first[i].point());
                paired_first[i] = true;
                pairs.push((i, j, lane.id, disp));
            }
        }

        // Stable ids follow frame-1 order, independent of lane order
        pairs.sort_by_key(|p| p.0);

        let tracked: Vec<TrackedVehicle> = pairs
            .into_iter()
            .enumerate()
            .map(|(k, (i, j, lane, disp))| {
                debug!(
                    "🔗 V{} lane {}: ({:.0},{:.0}) → ({:.0},{:.0}), {:.1}px along axis",
                    k + 1,
                    lane,
                    first[i].x,
                    first[i].y,
                    second[j].x,
                    second[j].y,
                    disp
                );
                TrackedVehicle {
                    id: k as u32 + 1,
                    lane,
                    first: first[i],
                    second: second[j],
                    axial_displacement_px: disp.max(0.0),
                    elapsed_seconds,
                }
            })
            .collect();

        let untracked: Vec<UntrackedDetection> = first
            .iter()
            .enumerate()
            .filter(|(i, _)| !paired_first[*i])
            .map(|(i, c)| UntrackedDetection {
                centroid: *c,
                lane: lanes_first[i],
            })
            .collect();

        let outside = untracked.iter().filter(|u| u.lane.is_none()).count();
        info!(
            "Tracked {} of {} frame-1 vehicle(s) ({} outside lanes, {} unmatched)",
            tracked.len(),
            first.len(),
            outside,
            untracked.len() - outside
        );

        TrackingOutcome { tracked, untracked }
    }

    /// Lane of a centroid; points outside the frame are never assigned
    fn lane_for(&self, c: &Centroid, lanes: &LaneSet) -> Option<LaneId> {
        let (w, h) = (self.frame.width as f32, self.frame.height as f32);
        if c.x < 0.0 || c.y < 0.0 || c.x > w || c.y > h {
            return None;
        }
        lanes.lane_of(c.point())
    }

    fn admissible(&self, displacement: f32) -> bool {
        displacement >= self.config.min_axis_displacement_px
            && self
                .config
                .max_axis_displacement_px
                .map_or(true, |max| displacement <= max)
    }

    /// Order-preserving alignment of two axis-sorted lists.
    /// Returns (frame-1 index, frame-2 index) pairs.
    fn align(&self, a: &[AxisEntry], b: &[AxisEntry]) -> Vec<(usize, usize)> {
        let (n, m) = (a.len(), b.len());
        let mut best = vec![vec![Score::EMPTY; m + 1]; n + 1];
        let mut step = vec![vec![Step::SkipFirst; m + 1]; n + 1];

        for i in (0..n).rev() {
            for j in (0..m).rev() {
                let mut score = best[i + 1][j];
                let mut choice = Step::SkipFirst;

                if best[i][j + 1].beats(&score) {
                    score = best[i][j + 1];
                    choice = Step::SkipSecond;
                }

                let d = b[j].pos - a[i].pos;
                if self.admissible(d) {
                    let rest = best[i + 1][j + 1];
                    let paired = Score {
                        pairs: rest.pairs + 1,
                        cost: rest.cost + d as f64,
                    };
                    // Ties go to pairing, which keeps the earliest indices
                    if !score.beats(&paired) {
                        score = paired;
                        choice = Step::Pair;
                    }
                }

                best[i][j] = score;
                step[i][j] = choice;
            }
        }

        let mut out = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < n && j < m {
            match step[i][j] {
                Step::Pair => {
                    out.push((a[i].index, b[j].index));
                    i += 1;
                    j += 1;
                }
                Step::SkipFirst => i += 1,
                Step::SkipSecond => j += 1,
            }
        }
        out
    }
}

/// Detections assigned to `lane`, sorted upstream → downstream
fn axis_entries(points: &[Centroid], assigned: &[Option<LaneId>], lane: &Lane) -> Vec<AxisEntry> {
    let mut entries: Vec<AxisEntry> = points
        .iter()
        .zip(assigned)
        .enumerate()
        .filter(|(_, (_, l))| **l == Some(lane.id))
        .map(|(index, (c, _))| AxisEntry {
            index,
            pos: lane.project(c.point()),
        })
        .collect();
    entries.sort_by(|x, y| {
        x.pos
            .partial_cmp(&y.pos)
            .unwrap_or(Ordering::Equal)
            .then(x.index.cmp(&y.index))
    });
    entries
}
