// src/lane_model.rs
//
// Calibrated lane geometry for a fixed camera. Each lane is an image-plane
// polygon with a metres-per-pixel scale and a travel direction.
//
// File format, one lane per line (`#` starts a comment):
//
//   <scale_m_per_px> <down|up|left|right> <x,y> <x,y> <x,y> [...]
//
// Lanes are numbered from 1 in file order. The travel axis of a lane is the
// principal axis of its vertices, oriented to agree with the declared
// direction, so perspective-skewed lanes get a slanted axis.

use crate::error::EstimatorError;
use crate::types::{LaneId, Point};
use anyhow::Result;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TravelDirection {
    Down,
    Up,
    Left,
    Right,
}

impl TravelDirection {
    /// Unit vector in image coordinates (y grows downwards)
    fn unit(&self) -> (f32, f32) {
        match self {
            Self::Down => (0.0, 1.0),
            Self::Up => (0.0, -1.0),
            Self::Left => (-1.0, 0.0),
            Self::Right => (1.0, 0.0),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Down => "down",
            Self::Up => "up",
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

impl FromStr for TravelDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "down" => Ok(Self::Down),
            "up" => Ok(Self::Up),
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            other => Err(format!("unknown direction '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Lane {
    pub id: LaneId,
    pub boundary: Vec<Point>,
    /// Metres per image pixel along this lane
    pub scale: f32,
    pub direction: TravelDirection,
    /// Unit vector of travel in image coordinates
    axis: (f32, f32),
}

impl Lane {
    pub fn new(
        id: LaneId,
        boundary: Vec<Point>,
        scale: f32,
        direction: TravelDirection,
    ) -> Result<Self> {
        if boundary.len() < 3 {
            return Err(EstimatorError::config(format!(
                "lane {} needs at least 3 boundary points (got {})",
                id,
                boundary.len()
            ))
            .into());
        }
        if !(scale.is_finite() && scale > 0.0) {
            return Err(EstimatorError::config(format!(
                "lane {} scale must be positive (got {})",
                id, scale
            ))
            .into());
        }
        let axis = travel_axis(&boundary, direction);
        Ok(Self {
            id,
            boundary,
            scale,
            direction,
            axis,
        })
    }

    pub fn axis(&self) -> (f32, f32) {
        self.axis
    }

    /// Signed position of `p` along the travel axis
    pub fn project(&self, p: Point) -> f32 {
        p.x * self.axis.0 + p.y * self.axis.1
    }

    /// Even-odd ray casting. Points exactly on an edge may go either way.
    pub fn contains(&self, p: Point) -> bool {
        let pts = &self.boundary;
        let mut inside = false;
        let mut j = pts.len() - 1;
        for i in 0..pts.len() {
            let (a, b) = (pts[i], pts[j]);
            if (a.y > p.y) != (b.y > p.y) {
                let x_cross = (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x;
                if p.x < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }
}

/// Smallest |cos| between the principal axis and the declared direction
/// for the principal axis to be used; beyond ~60° the lane is taken to be
/// wider than it is long.
const MIN_AXIS_AGREEMENT: f32 = 0.5;

/// Principal axis of the vertex cloud, flipped to agree with `direction`.
/// Isotropic polygons, and polygons whose principal axis runs across the
/// declared direction, use the declared direction itself.
fn travel_axis(points: &[Point], direction: TravelDirection) -> (f32, f32) {
    let n = points.len() as f32;
    let mx = points.iter().map(|p| p.x).sum::<f32>() / n;
    let my = points.iter().map(|p| p.y).sum::<f32>() / n;

    let (mut sxx, mut syy, mut sxy) = (0.0f32, 0.0f32, 0.0f32);
    for p in points {
        let (dx, dy) = (p.x - mx, p.y - my);
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }

    let hint = direction.unit();
    if (sxx - syy).abs() < 1e-6 && sxy.abs() < 1e-6 {
        return hint;
    }

    // Snap trig residue so axis-aligned lanes project exactly
    let snap = |v: f32| if v.abs() < 1e-6 { 0.0 } else { v };
    let theta = 0.5 * (2.0 * sxy).atan2(sxx - syy);
    let (ax, ay) = (snap(theta.cos()), snap(theta.sin()));
    let agreement = ax * hint.0 + ay * hint.1;
    if agreement.abs() < MIN_AXIS_AGREEMENT {
        hint
    } else if agreement < 0.0 {
        (-ax, -ay)
    } else {
        (ax, ay)
    }
}

/// Immutable set of lanes shared by the tracker and the estimator
#[derive(Debug, Clone)]
pub struct LaneSet {
    lanes: Vec<Lane>,
}

impl LaneSet {
    pub fn new(lanes: Vec<Lane>) -> Result<Self> {
        if lanes.is_empty() {
            return Err(EstimatorError::config("lane definition contains no lanes").into());
        }
        Ok(Self { lanes })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            EstimatorError::config(format!("cannot read lane file '{}': {}", path.display(), e))
        })?;
        let set = Self::parse(&text).map_err(|e| {
            EstimatorError::config(format!("lane file '{}': {}", path.display(), root_message(&e)))
        })?;
        info!("✓ Loaded {} lane(s) from {}", set.len(), path.display());
        Ok(set)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut lanes = Vec::new();

        for (line_no, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let at = |msg: String| EstimatorError::config(format!("line {}: {}", line_no + 1, msg));

            let mut tokens = line.split_whitespace();
            let scale: f32 = tokens
                .next()
                .ok_or_else(|| at("missing scale".to_string()))?
                .parse()
                .map_err(|_| at("scale is not a number".to_string()))?;
            let direction: TravelDirection = tokens
                .next()
                .ok_or_else(|| at("missing direction".to_string()))?
                .parse()
                .map_err(at)?;

            let mut boundary = Vec::new();
            for tok in tokens {
                boundary.push(parse_point(tok).ok_or_else(|| at(format!("bad point '{}'", tok)))?);
            }

            let id = LaneId(lanes.len() as u32 + 1);
            let lane = Lane::new(id, boundary, scale, direction)
                .map_err(|e| at(root_message(&e)))?;
            debug!(
                "Lane {}: {} vertices, scale={:.4} m/px, dir={}, axis=({:.3},{:.3})",
                lane.id,
                lane.boundary.len(),
                lane.scale,
                lane.direction.as_str(),
                lane.axis().0,
                lane.axis().1
            );
            lanes.push(lane);
        }

        Self::new(lanes)
    }

    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    pub fn lanes(&self) -> &[Lane] {
        &self.lanes
    }

    pub fn ids(&self) -> impl Iterator<Item = LaneId> + '_ {
        self.lanes.iter().map(|l| l.id)
    }

    pub fn get(&self, id: LaneId) -> Option<&Lane> {
        let idx = (id.0 as usize).checked_sub(1)?;
        self.lanes.get(idx)
    }

    /// First lane whose polygon contains the point; `None` = unassigned
    pub fn lane_of(&self, p: Point) -> Option<LaneId> {
        self.lanes.iter().find(|l| l.contains(p)).map(|l| l.id)
    }

    pub fn scale_of(&self, id: LaneId) -> Result<f32> {
        self.get(id)
            .map(|l| l.scale)
            .ok_or_else(|| EstimatorError::config(format!("no scale for lane {}", id)).into())
    }
}

fn parse_point(tok: &str) -> Option<Point> {
    let (x, y) = tok.split_once(',')?;
    let x: f32 = x.trim().parse().ok()?;
    let y: f32 = y.trim().parse().ok()?;
    (x.is_finite() && y.is_finite()).then(|| Point::new(x, y))
}

fn root_message(err: &anyhow::Error) -> String {
    match err.downcast_ref::<EstimatorError>() {
        Some(EstimatorError::Config(msg)) => msg.clone(),
        _ => err.to_string(),
    }
}
