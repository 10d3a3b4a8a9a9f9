use geo_types::{Coord, LineString, MultiPolygon, Point, Polygon};
use proj4rs::proj::Proj;
use proj4rs::transform::transform;

use crate::error::PipelineError;

/// Geographic lat/lon CRS used by every upstream source.
pub const WGS84_EPSG: u16 = 4326;

/// EPSG-coded coordinate transform between two fixed reference systems.
///
/// Both CRS are resolved at construction time so an unknown code fails fast
/// as a configuration error, never mid-batch. Transforms are applied
/// independently per coordinate pair; ring structure and winding order pass
/// through untouched.
pub struct Reprojector {
    from: Proj,
    to: Proj,
    from_epsg: u16,
    to_epsg: u16,
}

impl Reprojector {
    pub fn new(from_epsg: u16, to_epsg: u16) -> Result<Self, PipelineError> {
        let resolve = |epsg: u16| {
            Proj::from_epsg_code(epsg).map_err(|e| {
                PipelineError::Configuration(format!(
                    "unknown or unsupported CRS code EPSG:{epsg}: {e}"
                ))
            })
        };
        Ok(Self {
            from: resolve(from_epsg)?,
            to: resolve(to_epsg)?,
            from_epsg,
            to_epsg,
        })
    }

    pub fn from_epsg(&self) -> u16 {
        self.from_epsg
    }

    pub fn to_epsg(&self) -> u16 {
        self.to_epsg
    }

    /// Transform a single coordinate pair. Geographic CRS speak degrees at
    /// this interface; the radian conversion proj4rs expects is internal.
    pub fn transform_xy(&self, x: f64, y: f64) -> Result<(f64, f64), PipelineError> {
        let mut point = (x, y, 0.0);
        if self.from.is_latlong() {
            point.0 = point.0.to_radians();
            point.1 = point.1.to_radians();
        }
        transform(&self.from, &self.to, &mut point)
            .map_err(|e| PipelineError::Projection(e.to_string()))?;
        if self.to.is_latlong() {
            point.0 = point.0.to_degrees();
            point.1 = point.1.to_degrees();
        }
        Ok((point.0, point.1))
    }

    pub fn transform_point(&self, point: Point<f64>) -> Result<Point<f64>, PipelineError> {
        let (x, y) = self.transform_xy(point.x(), point.y())?;
        Ok(Point::new(x, y))
    }

    pub fn transform_points(&self, points: &[Point<f64>]) -> Result<Vec<Point<f64>>, PipelineError> {
        points.iter().map(|p| self.transform_point(*p)).collect()
    }

    fn transform_ring(&self, ring: &LineString<f64>) -> Result<LineString<f64>, PipelineError> {
        let coords: Result<Vec<Coord<f64>>, PipelineError> = ring
            .coords()
            .map(|c| self.transform_xy(c.x, c.y).map(|(x, y)| Coord { x, y }))
            .collect();
        Ok(LineString::new(coords?))
    }

    pub fn transform_polygon(&self, polygon: &Polygon<f64>) -> Result<Polygon<f64>, PipelineError> {
        let exterior = self.transform_ring(polygon.exterior())?;
        let interiors: Result<Vec<LineString<f64>>, PipelineError> = polygon
            .interiors()
            .iter()
            .map(|ring| self.transform_ring(ring))
            .collect();
        Ok(Polygon::new(exterior, interiors?))
    }

    pub fn transform_multi_polygon(
        &self,
        multi: &MultiPolygon<f64>,
    ) -> Result<MultiPolygon<f64>, PipelineError> {
        let polygons: Result<Vec<Polygon<f64>>, PipelineError> =
            multi.0.iter().map(|p| self.transform_polygon(p)).collect();
        Ok(MultiPolygon(polygons?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WEB_MERCATOR: u16 = 3857;

    #[test]
    fn unknown_epsg_code_fails_before_any_data() {
        let result = Reprojector::new(WGS84_EPSG, 65534);
        assert!(matches!(result, Err(PipelineError::Configuration(_))));
    }

    #[test]
    fn point_round_trip_recovers_coordinates() {
        let forward = Reprojector::new(WGS84_EPSG, WEB_MERCATOR).unwrap();
        let back = Reprojector::new(WEB_MERCATOR, WGS84_EPSG).unwrap();

        let original = Point::new(149.0, -35.0);
        let projected = forward.transform_point(original).unwrap();
        let recovered = back.transform_point(projected).unwrap();

        assert!((recovered.x() - original.x()).abs() < 1e-6);
        assert!((recovered.y() - original.y()).abs() < 1e-6);
    }

    #[test]
    fn projected_coordinates_leave_degree_range() {
        let forward = Reprojector::new(WGS84_EPSG, WEB_MERCATOR).unwrap();
        let projected = forward.transform_point(Point::new(149.0, -35.0)).unwrap();
        assert!(projected.x().abs() > 1_000_000.0);
        assert!(projected.y().abs() > 1_000_000.0);
    }

    #[test]
    fn polygon_ring_structure_is_preserved() {
        let exterior = LineString::from(vec![
            (0.0, 0.0),
            (1.0, 0.0),
            (1.0, 1.0),
            (0.0, 1.0),
            (0.0, 0.0),
        ]);
        let hole = LineString::from(vec![
            (0.25, 0.25),
            (0.75, 0.25),
            (0.75, 0.75),
            (0.25, 0.75),
            (0.25, 0.25),
        ]);
        let polygon = Polygon::new(exterior, vec![hole]);

        let reprojector = Reprojector::new(WGS84_EPSG, WEB_MERCATOR).unwrap();
        let projected = reprojector.transform_polygon(&polygon).unwrap();

        assert_eq!(projected.exterior().coords().count(), 5);
        assert_eq!(projected.interiors().len(), 1);
        assert_eq!(projected.interiors()[0].coords().count(), 5);
        // Closed rings stay closed
        let coords: Vec<_> = projected.exterior().coords().collect();
        assert_eq!(coords.first(), coords.last());
    }
}
