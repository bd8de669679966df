use crate::core::geometry::Segment;
use crate::core::material::Material;
use crate::error::{Error, Result};
use nalgebra::Point2;

/// A static wall: an open polyline of one or more segments.
#[derive(Debug, Clone, PartialEq)]
pub struct Obstacle {
    id: u32,
    vertices: Vec<Point2<f64>>,
    segments: Vec<Segment>,
    material: Material,
}

impl Obstacle {
    /// Create an obstacle from a polyline of at least two vertices.
    ///
    /// Errors name the obstacle id when a vertex is non-finite or two
    /// consecutive vertices coincide.
    pub fn new(id: u32, vertices: Vec<Point2<f64>>, material: Material) -> Result<Self> {
        if vertices.len() < 2 {
            return Err(Error::config(format!(
                "obstacle {id}: polyline needs at least 2 vertices, got {}",
                vertices.len()
            )));
        }
        let segments = vertices
            .windows(2)
            .enumerate()
            .map(|(k, w)| {
                Segment::new(w[0], w[1]).map_err(|e| e.within(format!("obstacle {id}, segment {k}")))
            })
            .collect::<Result<Vec<_>>>()?;
        material
            .validate()
            .map_err(|e| e.within(format!("obstacle {id}")))?;
        Ok(Self {
            id,
            vertices,
            segments,
            material,
        })
    }

    /// Single straight wall between `a` and `b`.
    pub fn wall(id: u32, a: Point2<f64>, b: Point2<f64>, material: Material) -> Result<Self> {
        Self::new(id, vec![a, b], material)
    }

    /// Stable obstacle identifier.
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Polyline vertices.
    #[inline]
    pub fn vertices(&self) -> &[Point2<f64>] {
        &self.vertices
    }

    /// Segments between consecutive vertices.
    #[inline]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// First and last vertex coincide.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.vertices.first() == self.vertices.last()
    }

    /// Surface material.
    #[inline]
    pub fn material(&self) -> &Material {
        &self.material
    }

    /// Shortest distance from `p` to any segment.
    pub fn distance_to(&self, p: &Point2<f64>) -> f64 {
        self.segments
            .iter()
            .map(|s| s.distance_to(p))
            .fold(f64::INFINITY, f64::min)
    }
}
