//! Pedestrian and bike bodies from measures, and seeded crowd generation.

use crate::core::agent::{Agent, Body, Drive, Goal, Kinematics};
use crate::core::geometry::Disk;
use crate::core::material::Material;
use crate::error::{Error, Result};
use nalgebra::{Point2, Vector2};
use rand::{rng, rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Side-disk radius relative to the central (chest) disk.
const SHOULDER_RATIO: f64 = 0.6;
/// Intermediate-disk radius relative to the central disk.
const ARM_RATIO: f64 = 0.8;

/// Body measures of one pedestrian, SI units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measures {
    /// Shoulder width (m).
    pub bideltoid_breadth: f64,
    /// Front-to-back chest thickness (m).
    pub chest_depth: f64,
    /// Body mass (kg).
    pub weight: f64,
}

impl Measures {
    /// Check that the measures describe a plausible torso.
    pub fn validate(&self) -> Result<()> {
        for (name, v) in [
            ("bideltoid_breadth", self.bideltoid_breadth),
            ("chest_depth", self.chest_depth),
            ("weight", self.weight),
        ] {
            if !v.is_finite() || v <= 0.0 {
                return Err(Error::config(format!(
                    "{name} must be finite and > 0, got {v}"
                )));
            }
        }
        if self.bideltoid_breadth < self.chest_depth {
            return Err(Error::config(format!(
                "bideltoid_breadth ({}) must not be smaller than chest_depth ({})",
                self.bideltoid_breadth, self.chest_depth
            )));
        }
        Ok(())
    }
}

/// Five disks along the shoulder line (local `y`), symmetric about the center.
///
/// The central disk spans the chest depth; the outer edges of the shoulder
/// disks sit at half the bideltoid breadth.
pub fn pedestrian_body(m: &Measures) -> Result<Body> {
    m.validate()?;
    let r_center = 0.5 * m.chest_depth;
    let r_shoulder = SHOULDER_RATIO * r_center;
    let r_arm = ARM_RATIO * r_center;
    let y_shoulder = 0.5 * m.bideltoid_breadth - r_shoulder;
    let y_arm = 0.5 * y_shoulder;
    Body::new(vec![
        Disk::new(Vector2::new(0.0, y_shoulder), r_shoulder)?,
        Disk::new(Vector2::new(0.0, y_arm), r_arm)?,
        Disk::new(Vector2::zeros(), r_center)?,
        Disk::new(Vector2::new(0.0, -y_arm), r_arm)?,
        Disk::new(Vector2::new(0.0, -y_shoulder), r_shoulder)?,
    ])
}

/// Dimensions of one bike, SI units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BikeMeasures {
    /// Tyre width (m); sets the disk radius of the whole body.
    pub wheel_width: f64,
    /// Front-to-back length, wheels included (m).
    pub total_length: f64,
    /// Handlebar span (m).
    pub handlebar_length: f64,
    /// Seat-to-head-tube length (m).
    pub top_tube_length: f64,
    /// Mass (kg).
    pub weight: f64,
}

impl BikeMeasures {
    /// Check that the parts fit together.
    pub fn validate(&self) -> Result<()> {
        for (name, v) in [
            ("wheel_width", self.wheel_width),
            ("total_length", self.total_length),
            ("handlebar_length", self.handlebar_length),
            ("top_tube_length", self.top_tube_length),
            ("weight", self.weight),
        ] {
            if !v.is_finite() || v <= 0.0 {
                return Err(Error::config(format!(
                    "{name} must be finite and > 0, got {v}"
                )));
            }
        }
        if self.top_tube_length > self.total_length {
            return Err(Error::config(format!(
                "top_tube_length ({}) must not exceed total_length ({})",
                self.top_tube_length, self.total_length
            )));
        }
        if self.wheel_width > self.total_length.min(self.handlebar_length) {
            return Err(Error::config(format!(
                "wheel_width ({}) must not exceed total_length or handlebar_length",
                self.wheel_width
            )));
        }
        Ok(())
    }
}

/// Centers of equal disks of radius `r` covering `[-half, half]` without gaps.
fn disk_chain(half: f64, r: f64) -> Vec<f64> {
    let reach = half - r;
    if reach <= 0.0 {
        return vec![0.0];
    }
    let n = (reach / r).ceil() as usize;
    (0..=n)
        .map(|k| -reach + 2.0 * reach * k as f64 / n as f64)
        .collect()
}

/// Frame along the heading (local `x`) plus a handlebar across it (local `y`),
/// both as chains of disks as wide as the tyre.
///
/// The handlebar sits at the front end of the top tube, which is centered on
/// the body.
pub fn bike_body(m: &BikeMeasures) -> Result<Body> {
    m.validate()?;
    let r = 0.5 * m.wheel_width;
    let x_bar = (0.5 * m.top_tube_length).min(0.5 * m.total_length - r);
    let frame = disk_chain(0.5 * m.total_length, r)
        .into_iter()
        .map(|x| Disk::new(Vector2::new(x, 0.0), r));
    let handlebar = disk_chain(0.5 * m.handlebar_length, r)
        .into_iter()
        .map(|y| Disk::new(Vector2::new(x_bar, y), r));
    Body::new(frame.chain(handlebar).collect::<Result<Vec<_>>>()?)
}

/// Biological sex, used only to pick the measure distributions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sex {
    /// Male statistics.
    Male,
    /// Female statistics.
    Female,
}

/// A normal distribution truncated to `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TruncatedNormal {
    /// Mean.
    pub mean: f64,
    /// Standard deviation.
    pub std_dev: f64,
    /// Lower bound.
    pub min: f64,
    /// Upper bound.
    pub max: f64,
}

impl TruncatedNormal {
    fn validate(&self) -> Result<()> {
        let finite = [self.mean, self.std_dev, self.min, self.max]
            .iter()
            .all(|x| x.is_finite());
        if !finite || self.std_dev < 0.0 || self.min > self.max {
            return Err(Error::config(format!(
                "truncated normal needs finite parameters, std_dev >= 0 and min <= max, got {self:?}"
            )));
        }
        Ok(())
    }

    /// Draw one value by resampling out-of-range Box-Muller variates, falling
    /// back to clamping after a bounded number of attempts.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> f64 {
        const MAX_ATTEMPTS: usize = 64;
        for _ in 0..MAX_ATTEMPTS {
            let x = self.mean + self.std_dev * standard_normal(rng);
            if (self.min..=self.max).contains(&x) {
                return x;
            }
        }
        self.mean.clamp(self.min, self.max)
    }
}

/// Box-Muller transform.
fn standard_normal<R: Rng>(rng: &mut R) -> f64 {
    // u1 in (0, 1] so ln(u1) is finite.
    let u1: f64 = 1.0 - rng.random::<f64>();
    let u2: f64 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

/// Measure distributions for one sex.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasureStatistics {
    /// Shoulder width (m).
    pub bideltoid_breadth: TruncatedNormal,
    /// Chest depth (m).
    pub chest_depth: TruncatedNormal,
    /// Body mass (kg).
    pub weight: TruncatedNormal,
}

impl MeasureStatistics {
    fn sample<R: Rng>(&self, rng: &mut R) -> Measures {
        let chest_depth = self.chest_depth.sample(rng);
        // Keep the torso wider than deep even in the tails.
        let bideltoid_breadth = self.bideltoid_breadth.sample(rng).max(chest_depth);
        Measures {
            bideltoid_breadth,
            chest_depth,
            weight: self.weight.sample(rng),
        }
    }
}

/// Bike dimension distributions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BikeStatistics {
    /// Tyre width (m).
    pub wheel_width: TruncatedNormal,
    /// Overall length (m).
    pub total_length: TruncatedNormal,
    /// Handlebar span (m).
    pub handlebar_length: TruncatedNormal,
    /// Top tube length (m).
    pub top_tube_length: TruncatedNormal,
    /// Mass (kg).
    pub weight: TruncatedNormal,
}

impl Default for BikeStatistics {
    fn default() -> Self {
        Self {
            wheel_width: tn(0.045, 0.008, 0.025, 0.07),
            total_length: tn(1.75, 0.08, 1.5, 2.0),
            handlebar_length: tn(0.60, 0.05, 0.45, 0.80),
            top_tube_length: tn(0.56, 0.04, 0.45, 0.68),
            weight: tn(14.0, 3.0, 7.0, 25.0),
        }
    }
}

impl BikeStatistics {
    fn validate(&self) -> Result<()> {
        for d in [
            &self.wheel_width,
            &self.total_length,
            &self.handlebar_length,
            &self.top_tube_length,
            &self.weight,
        ] {
            d.validate()?;
        }
        Ok(())
    }

    fn sample<R: Rng>(&self, rng: &mut R) -> BikeMeasures {
        let total_length = self.total_length.sample(rng);
        let handlebar_length = self.handlebar_length.sample(rng);
        BikeMeasures {
            wheel_width: self
                .wheel_width
                .sample(rng)
                .min(total_length)
                .min(handlebar_length),
            total_length,
            handlebar_length,
            top_tube_length: self.top_tube_length.sample(rng).min(total_length),
            weight: self.weight.sample(rng),
        }
    }
}

fn tn(mean: f64, std_dev: f64, min: f64, max: f64) -> TruncatedNormal {
    TruncatedNormal {
        mean,
        std_dev,
        min,
        max,
    }
}

/// Population-level measure statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CrowdStatistics {
    /// Share of male pedestrians, in `[0, 1]`.
    pub male_proportion: f64,
    /// Male distributions.
    pub male: MeasureStatistics,
    /// Female distributions.
    pub female: MeasureStatistics,
    /// Bike distributions.
    #[serde(default)]
    pub bike: BikeStatistics,
}

impl Default for CrowdStatistics {
    fn default() -> Self {
        Self {
            male_proportion: 0.5,
            male: MeasureStatistics {
                bideltoid_breadth: tn(0.510, 0.030, 0.40, 0.62),
                chest_depth: tn(0.255, 0.022, 0.19, 0.33),
                weight: tn(85.0, 14.0, 50.0, 140.0),
            },
            female: MeasureStatistics {
                bideltoid_breadth: tn(0.449, 0.026, 0.36, 0.55),
                chest_depth: tn(0.243, 0.023, 0.18, 0.32),
                weight: tn(68.0, 11.5, 40.0, 120.0),
            },
            bike: BikeStatistics::default(),
        }
    }
}

impl CrowdStatistics {
    /// Validate every distribution and the sex ratio.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.male_proportion) {
            return Err(Error::config(format!(
                "male_proportion must be in [0, 1], got {}",
                self.male_proportion
            )));
        }
        for s in [&self.male, &self.female] {
            s.bideltoid_breadth.validate()?;
            s.chest_depth.validate()?;
            s.weight.validate()?;
        }
        self.bike.validate()
    }
}

/// Axis-aligned placement area.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Area {
    /// Lower-left corner.
    pub min: Point2<f64>,
    /// Upper-right corner.
    pub max: Point2<f64>,
}

/// Seeded generator of pedestrians with random measures and non-overlapping
/// initial positions.
#[derive(Debug, Clone)]
pub struct PopulationGenerator {
    stats: CrowdStatistics,
    rng: StdRng,
}

impl PopulationGenerator {
    /// `seed = None` draws a seed from the thread RNG.
    pub fn new(stats: CrowdStatistics, seed: Option<u64>) -> Result<Self> {
        stats.validate()?;
        let rng: StdRng = match seed {
            Some(s) => SeedableRng::seed_from_u64(s),
            None => SeedableRng::seed_from_u64(rng().random()),
        };
        Ok(Self { stats, rng })
    }

    /// Draw the sex and measures of one pedestrian.
    pub fn draw_measures(&mut self) -> (Sex, Measures) {
        let sex = if self.rng.random::<f64>() < self.stats.male_proportion {
            Sex::Male
        } else {
            Sex::Female
        };
        let stats = match sex {
            Sex::Male => &self.stats.male,
            Sex::Female => &self.stats.female,
        };
        (sex, stats.sample(&mut self.rng))
    }

    /// Draw the dimensions of one bike.
    pub fn draw_bike_measures(&mut self) -> BikeMeasures {
        self.stats.bike.sample(&mut self.rng)
    }

    /// Generate `count` bikes inside `area` with ids `first_id..`, placed like
    /// [`populate`](Self::populate) places pedestrians.
    pub fn populate_bikes(
        &mut self,
        count: usize,
        first_id: u32,
        area: Area,
        drive: Drive,
        material: Material,
    ) -> Result<Vec<Agent>> {
        self.place(count, first_id, area, drive, material, |g| {
            let m = g.draw_bike_measures();
            Ok((bike_body(&m)?, m.weight))
        })
    }

    /// Generate `count` pedestrians inside `area` with ids `first_id..`.
    ///
    /// Positions are rejection-sampled so that bounding circles never
    /// overlap; agents face their goal (or `+x` without one) and start at rest.
    pub fn populate(
        &mut self,
        count: usize,
        first_id: u32,
        area: Area,
        drive: Drive,
        material: Material,
    ) -> Result<Vec<Agent>> {
        self.place(count, first_id, area, drive, material, |g| {
            let (_, m) = g.draw_measures();
            Ok((pedestrian_body(&m)?, m.weight))
        })
    }

    fn place<F>(
        &mut self,
        count: usize,
        first_id: u32,
        area: Area,
        drive: Drive,
        material: Material,
        mut draw: F,
    ) -> Result<Vec<Agent>>
    where
        F: FnMut(&mut Self) -> Result<(Body, f64)>,
    {
        let span = area.max - area.min;
        if !(span.x > 0.0 && span.y > 0.0) || !span.iter().all(|x| x.is_finite()) {
            return Err(Error::config(format!(
                "placement area must have positive finite extent, got {area:?}"
            )));
        }
        if count > 0 {
            u32::try_from(count - 1)
                .ok()
                .and_then(|n| first_id.checked_add(n))
                .ok_or_else(|| {
                    Error::config(format!(
                        "{count} agents starting at id {first_id} overflow the id range"
                    ))
                })?;
        }
        let max_attempts = 100_000usize;
        let mut agents: Vec<Agent> = Vec::with_capacity(count);
        for k in 0..count {
            // In range: checked above.
            let id = first_id + k as u32;
            let (body, mass) = draw(self)?;
            let reach = body.bounding_radius();
            let (lo, hi) = (area.min + Vector2::repeat(reach), area.max - Vector2::repeat(reach));
            if lo.x > hi.x || lo.y > hi.y {
                return Err(Error::config(format!(
                    "placement area too small for agent {id} (bounding radius {reach:.3})"
                )));
            }
            let mut attempts = 0usize;
            let position = loop {
                if attempts >= max_attempts {
                    return Err(Error::config(format!(
                        "failed to place agent {id} without overlap; try fewer agents or a larger area"
                    )));
                }
                attempts += 1;
                let p = Point2::new(
                    self.rng.random_range(lo.x..=hi.x),
                    self.rng.random_range(lo.y..=hi.y),
                );
                if !overlaps_existing(&agents, &p, reach) {
                    break p;
                }
            };
            let orientation = match drive.goal {
                Goal::Point(g) if g != position => (g - position).y.atan2((g - position).x),
                Goal::Direction(d) => d.y.atan2(d.x),
                _ => 0.0,
            };
            agents.push(Agent::new(
                id,
                body,
                mass,
                None,
                Kinematics::at(position).facing(orientation),
                drive,
                material,
            )?);
        }
        tracing::debug!(count, "population placed");
        Ok(agents)
    }
}

fn overlaps_existing(existing: &[Agent], p: &Point2<f64>, reach: f64) -> bool {
    existing.iter().any(|a| {
        let min_dist = a.bounding_radius() + reach;
        (a.kinematics().position - p).norm_squared() < min_dist * min_dist
    })
}
