#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! In-memory coastline index for distance-to-coast lookups.
//!
//! Loads land polygons from a `GeoJSON` file, turns every ring into
//! coastline segments, and bulk-loads them into an R-tree. Queries find
//! the nearest segment in lon/lat space, project the point onto it, and
//! measure the geodesic distance to that projection.

pub mod geodesic;

use std::path::{Path, PathBuf};

use geo::{Closest, ClosestPoint, Distance, Euclidean, Line, LineString, Point};
use geojson::GeoJson;
use rstar::{AABB, PointDistance, RTree, RTreeObject};

/// Errors from loading a coastline file.
#[derive(Debug, thiserror::Error)]
pub enum SpatialError {
    /// The land file could not be read.
    #[error("Cannot read land file {}: {source}", path.display())]
    Io {
        /// Land file path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The land file is not valid `GeoJSON`.
    #[error("Invalid GeoJSON in {}: {source}", path.display())]
    GeoJson {
        /// Land file path.
        path: PathBuf,
        /// Underlying error.
        source: Box<geojson::Error>,
    },
}

/// One straight piece of coastline stored in the R-tree.
pub struct CoastSegment {
    line: Line<f64>,
    envelope: AABB<[f64; 2]>,
}

impl CoastSegment {
    fn new(line: Line<f64>) -> Self {
        let envelope = AABB::from_corners([line.start.x, line.start.y], [line.end.x, line.end.y]);
        Self { line, envelope }
    }

    /// Point on this segment closest to `point` in lon/lat space.
    #[must_use]
    pub fn closest_point(&self, point: &Point<f64>) -> Point<f64> {
        match self.line.closest_point(point) {
            Closest::Intersection(p) | Closest::SinglePoint(p) => p,
            Closest::Indeterminate => self.line.start.into(),
        }
    }
}

impl RTreeObject for CoastSegment {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

impl PointDistance for CoastSegment {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let d = Euclidean.distance(&Point::new(point[0], point[1]), &self.line);
        d * d
    }
}

/// Result of a nearest-coast query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoastMatch {
    /// Closest point on the coastline, `(lon, lat)`.
    pub coast_point: Point<f64>,
    /// Geodesic distance from the query point to `coast_point`.
    pub distance_km: f64,
}

/// R-tree of coastline segments.
///
/// Built once per run and queried for every point. Nearest-segment search
/// uses planar lon/lat distance; the reported distance is geodesic.
pub struct CoastlineIndex {
    segments: RTree<CoastSegment>,
}

impl CoastlineIndex {
    /// Loads a land `GeoJSON` file (`FeatureCollection`, `Feature`, or a
    /// bare geometry).
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError`] if the file cannot be read or is not valid
    /// `GeoJSON`.
    pub fn load(path: &Path) -> Result<Self, SpatialError> {
        let text = std::fs::read_to_string(path).map_err(|source| SpatialError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let geojson: GeoJson = text.parse().map_err(|source| SpatialError::GeoJson {
            path: path.to_path_buf(),
            source: Box::new(source),
        })?;

        let index = match geojson {
            GeoJson::FeatureCollection(collection) => Self::from_collection(&collection),
            GeoJson::Feature(feature) => {
                Self::from_geometries(feature.geometry.iter().filter_map(to_geo))
            }
            GeoJson::Geometry(geometry) => Self::from_geometries(to_geo(&geometry)),
        };

        log::info!(
            "Loaded {} coastline segments from {}",
            index.len(),
            path.display()
        );

        Ok(index)
    }

    /// Builds an index from every polygon ring and line in `collection`.
    ///
    /// Features without geometry, or with geometry that cannot be
    /// converted, are skipped.
    #[must_use]
    pub fn from_collection(collection: &geojson::FeatureCollection) -> Self {
        Self::from_geometries(
            collection
                .features
                .iter()
                .filter_map(|f| f.geometry.as_ref())
                .filter_map(to_geo),
        )
    }

    /// Builds an index from `geo` geometries.
    pub fn from_geometries(geometries: impl IntoIterator<Item = geo::Geometry<f64>>) -> Self {
        let mut lines = Vec::new();
        for geometry in geometries {
            collect_lines(&geometry, &mut lines);
        }

        let segments = lines
            .iter()
            .flat_map(LineString::lines)
            .map(CoastSegment::new)
            .collect::<Vec<_>>();

        Self {
            segments: RTree::bulk_load(segments),
        }
    }

    /// Number of coastline segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.size()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.size() == 0
    }

    /// Finds the nearest coastline point to `(lon, lat)`.
    ///
    /// Returns `None` for an empty index. When several segments are
    /// equally near, whichever the tree visits first wins.
    #[must_use]
    pub fn nearest(&self, lon: f64, lat: f64) -> Option<CoastMatch> {
        if !lon.is_finite() || !lat.is_finite() {
            return None;
        }
        let segment = self.segments.nearest_neighbor(&[lon, lat])?;
        let coast_point = segment.closest_point(&Point::new(lon, lat));

        Some(CoastMatch {
            coast_point,
            distance_km: geodesic::distance_km(lon, lat, coast_point.x(), coast_point.y()),
        })
    }
}

fn to_geo(geometry: &geojson::Geometry) -> Option<geo::Geometry<f64>> {
    match geo::Geometry::<f64>::try_from(geometry.clone()) {
        Ok(geometry) => Some(geometry),
        Err(e) => {
            log::warn!("Skipping unconvertible land geometry: {e}");
            None
        }
    }
}

/// Appends every ring and line of `geometry` to `out`.
///
/// Rings are closed line strings, so the segment from the last vertex back
/// to the first is included.
fn collect_lines(geometry: &geo::Geometry<f64>, out: &mut Vec<LineString<f64>>) {
    match geometry {
        geo::Geometry::Polygon(polygon) => push_rings(polygon, out),
        geo::Geometry::MultiPolygon(multi) => {
            for polygon in multi {
                push_rings(polygon, out);
            }
        }
        geo::Geometry::Rect(rect) => push_rings(&rect.to_polygon(), out),
        geo::Geometry::Triangle(triangle) => push_rings(&triangle.to_polygon(), out),
        geo::Geometry::LineString(line) => out.push(line.clone()),
        geo::Geometry::MultiLineString(multi) => out.extend(multi.iter().cloned()),
        geo::Geometry::Line(line) => out.push(LineString::from(*line)),
        geo::Geometry::GeometryCollection(collection) => {
            for geometry in collection {
                collect_lines(geometry, out);
            }
        }
        geo::Geometry::Point(_) | geo::Geometry::MultiPoint(_) => {}
    }
}

fn push_rings(polygon: &geo::Polygon<f64>, out: &mut Vec<LineString<f64>>) {
    out.push(polygon.exterior().clone());
    out.extend(polygon.interiors().iter().cloned());
}
