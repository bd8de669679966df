//! Geometry kernel: disk/disk and disk/segment proximity queries in the plane.
//!
//! Everything here is a pure function of its inputs. Shapes are given in
//! world coordinates; the resolver is responsible for placing an agent's
//! local disks into the world frame before calling in.

use crate::error::{Error, Result};
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};

/// Distance below which two points are treated as coincident.
pub const GEOMETRY_EPS: f64 = 1e-12;

/// Normal used when two disk centers coincide and no direction is defined.
pub const FALLBACK_NORMAL: Vector2<f64> = Vector2::new(1.0, 0.0);

/// A disk of an agent body, expressed in the agent's local frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Disk {
    /// Offset of the disk center from the agent center (local frame, meters).
    pub offset: Vector2<f64>,
    /// Disk radius (meters, > 0).
    pub radius: f64,
}

impl Disk {
    /// Create a disk after validating that the offset is finite and the radius positive.
    pub fn new(offset: Vector2<f64>, radius: f64) -> Result<Self> {
        if !radius.is_finite() || radius <= 0.0 {
            return Err(Error::config(format!(
                "disk radius must be finite and > 0, got {radius}"
            )));
        }
        if !offset.iter().all(|x| x.is_finite()) {
            return Err(Error::config("disk offset must be finite"));
        }
        Ok(Self { offset, radius })
    }

    /// World-frame center of this disk for an agent at `center` with `orientation`.
    #[inline]
    pub fn world_center(&self, center: &Point2<f64>, orientation: f64) -> Point2<f64> {
        center + rotate(&self.offset, orientation)
    }
}

/// A static line segment between two distinct endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// First endpoint.
    pub a: Point2<f64>,
    /// Second endpoint.
    pub b: Point2<f64>,
}

impl Segment {
    /// Create a segment, rejecting non-finite or coincident endpoints.
    pub fn new(a: Point2<f64>, b: Point2<f64>) -> Result<Self> {
        if !a.iter().chain(b.iter()).all(|x| x.is_finite()) {
            return Err(Error::config("segment endpoints must be finite"));
        }
        if (b - a).norm() <= GEOMETRY_EPS {
            return Err(Error::config(format!(
                "degenerate segment: endpoints ({}, {}) coincide",
                a.x, a.y
            )));
        }
        Ok(Self { a, b })
    }

    /// Segment length.
    #[inline]
    pub fn length(&self) -> f64 {
        (self.b - self.a).norm()
    }

    /// Unit normal on the left-hand side when walking from `a` to `b`.
    #[inline]
    pub fn left_normal(&self) -> Vector2<f64> {
        perp(&(self.b - self.a)).normalize()
    }

    /// Closest point on the segment to `p`, with its projection parameter in [0, 1].
    pub fn closest_point(&self, p: &Point2<f64>) -> (Point2<f64>, f64) {
        let ab = self.b - self.a;
        let t = ((p - self.a).dot(&ab) / ab.norm_squared()).clamp(0.0, 1.0);
        (self.a + ab * t, t)
    }

    /// Distance from `p` to the segment.
    #[inline]
    pub fn distance_to(&self, p: &Point2<f64>) -> f64 {
        (p - self.closest_point(p).0).norm()
    }
}

/// Result of a disk/disk overlap query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiskOverlap {
    /// Signed overlap depth; positive means the disks interpenetrate.
    pub depth: f64,
    /// Unit normal from disk A's center toward disk B's center.
    pub normal: Vector2<f64>,
    /// Midpoint of the overlap along the normal.
    pub point: Point2<f64>,
    /// Centers coincide: `normal` is [`FALLBACK_NORMAL`] and no force must be applied.
    pub degenerate: bool,
}

/// Overlap between disk A (`ca`, `ra`) and disk B (`cb`, `rb`).
pub fn disk_disk(ca: &Point2<f64>, ra: f64, cb: &Point2<f64>, rb: f64) -> DiskOverlap {
    let d = cb - ca;
    let dist = d.norm();
    let depth = ra + rb - dist;
    if dist <= GEOMETRY_EPS {
        return DiskOverlap {
            depth,
            normal: FALLBACK_NORMAL,
            point: *ca,
            degenerate: true,
        };
    }
    let normal = d / dist;
    // Halfway between the two surface points that lie on the center line.
    let point = ca + normal * (ra - 0.5 * depth);
    DiskOverlap {
        depth,
        normal,
        point,
        degenerate: false,
    }
}

/// Result of a disk/segment proximity query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentProximity {
    /// Closest point on the segment to the disk center.
    pub closest: Point2<f64>,
    /// Distance from the disk center to `closest`.
    pub distance: f64,
    /// Unit normal pointing from the segment toward the disk center.
    pub normal: Vector2<f64>,
    /// Signed overlap depth (`radius - distance`).
    pub depth: f64,
    /// Midpoint of the penetrated region along the normal.
    pub point: Point2<f64>,
    /// Projection parameter of `closest` along the segment, in [0, 1].
    pub param: f64,
}

/// Proximity between a disk (`c`, `r`) and a segment.
///
/// When the center lies on the segment the outward direction is undefined;
/// the segment's left-hand normal is used instead.
pub fn disk_segment(c: &Point2<f64>, r: f64, seg: &Segment) -> SegmentProximity {
    let (closest, param) = seg.closest_point(c);
    let d = c - closest;
    let distance = d.norm();
    let normal = if distance <= GEOMETRY_EPS {
        seg.left_normal()
    } else {
        d / distance
    };
    let depth = r - distance;
    SegmentProximity {
        closest,
        distance,
        normal,
        depth,
        point: closest - normal * (0.5 * depth),
        param,
    }
}

/// Planar cross product `a × b` (z component).
#[inline]
pub fn cross(a: &Vector2<f64>, b: &Vector2<f64>) -> f64 {
    a.x * b.y - a.y * b.x
}

/// Rotate `v` by +90°.
#[inline]
pub fn perp(v: &Vector2<f64>) -> Vector2<f64> {
    Vector2::new(-v.y, v.x)
}

/// Rotate `v` counter-clockwise by `angle` radians.
#[inline]
pub fn rotate(v: &Vector2<f64>, angle: f64) -> Vector2<f64> {
    let (s, c) = angle.sin_cos();
    Vector2::new(c * v.x - s * v.y, s * v.x + c * v.y)
}

/// Wrap an angle into (-π, π].
pub fn wrap_angle(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI {
        wrapped + TAU
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn disjoint_disks_have_negative_depth() {
        let o = disk_disk(&Point2::new(0.0, 0.0), 0.25, &Point2::new(1.0, 0.0), 0.25);
        assert_relative_eq!(o.depth, -0.5, epsilon = 1e-12);
        assert_relative_eq!(o.normal, Vector2::new(1.0, 0.0), epsilon = 1e-12);
        assert!(!o.degenerate);
    }

    #[test]
    fn overlap_point_lies_between_surfaces() {
        let o = disk_disk(&Point2::new(0.0, 0.0), 0.3, &Point2::new(0.5, 0.0), 0.3);
        assert_relative_eq!(o.depth, 0.1, epsilon = 1e-12);
        // Surfaces at x = 0.3 (A) and x = 0.2 (B): midpoint 0.25.
        assert_relative_eq!(o.point, Point2::new(0.25, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn coincident_centers_use_fallback() {
        let c = Point2::new(2.0, -1.0);
        let o = disk_disk(&c, 0.2, &c, 0.3);
        assert!(o.degenerate);
        assert_eq!(o.normal, FALLBACK_NORMAL);
        assert_relative_eq!(o.depth, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn degenerate_segment_rejected() {
        let p = Point2::new(1.0, 1.0);
        let err = Segment::new(p, p).unwrap_err();
        assert!(err.to_string().contains("degenerate"));
    }

    #[test]
    fn segment_interior_projection() -> Result<()> {
        let seg = Segment::new(Point2::new(0.0, 0.0), Point2::new(4.0, 0.0))?;
        let prox = disk_segment(&Point2::new(1.0, 0.2), 0.25, &seg);
        assert_relative_eq!(prox.closest, Point2::new(1.0, 0.0), epsilon = 1e-12);
        assert_relative_eq!(prox.distance, 0.2, epsilon = 1e-12);
        assert_relative_eq!(prox.depth, 0.05, epsilon = 1e-12);
        assert_relative_eq!(prox.normal, Vector2::new(0.0, 1.0), epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn segment_endpoint_projection() -> Result<()> {
        let seg = Segment::new(Point2::new(0.0, 0.0), Point2::new(1.0, 0.0))?;
        let prox = disk_segment(&Point2::new(1.3, 0.4), 0.25, &seg);
        assert_relative_eq!(prox.closest, Point2::new(1.0, 0.0), epsilon = 1e-12);
        assert_relative_eq!(prox.distance, 0.5, epsilon = 1e-12);
        assert_relative_eq!(prox.normal, Vector2::new(0.6, 0.8), epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn center_on_segment_uses_left_normal() -> Result<()> {
        let seg = Segment::new(Point2::new(0.0, 0.0), Point2::new(2.0, 0.0))?;
        let prox = disk_segment(&Point2::new(1.0, 0.0), 0.3, &seg);
        assert_relative_eq!(prox.normal, Vector2::new(0.0, 1.0), epsilon = 1e-12);
        assert_relative_eq!(prox.depth, 0.3, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn wrap_angle_range() {
        assert_relative_eq!(wrap_angle(3.0 * PI), PI, epsilon = 1e-12);
        assert_relative_eq!(wrap_angle(-PI), PI, epsilon = 1e-12);
        assert_relative_eq!(wrap_angle(0.5), 0.5, epsilon = 1e-12);
        assert_relative_eq!(wrap_angle(-0.5 - TAU), -0.5, epsilon = 1e-12);
    }

    #[test]
    fn cross_and_rotate() {
        let x = Vector2::new(1.0, 0.0);
        let y = Vector2::new(0.0, 1.0);
        assert_relative_eq!(cross(&x, &y), 1.0);
        assert_relative_eq!(rotate(&x, PI / 2.0), y, epsilon = 1e-12);
        assert_eq!(perp(&x), y);
    }
}
