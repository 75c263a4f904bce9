use crate::geo::haversine_m;
use model::{Camera, Coordinate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    Far,
    Warning,
    Detection,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit<'a> {
    pub camera: &'a Camera,
    pub distance_m: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Classification<'a> {
    pub nearest_in_detection: Option<Hit<'a>>,
    pub nearest_in_warning: Option<Hit<'a>>,
}

impl<'a> Classification<'a> {
    /// The hit that matters for the driver: detection first, then warning.
    pub fn primary(&self) -> Option<(Band, Hit<'a>)> {
        self.nearest_in_detection
            .map(|h| (Band::Detection, h))
            .or(self.nearest_in_warning.map(|h| (Band::Warning, h)))
    }

    pub fn band(&self) -> Band {
        self.primary().map_or(Band::Far, |(b, _)| b)
    }
}

/// Band of a single camera for the given distance.
pub fn band_of(camera: &Camera, distance_m: f64) -> Band {
    if distance_m <= camera.detection_radius_m {
        Band::Detection
    } else if distance_m <= camera.warning_radius_m {
        Band::Warning
    } else {
        Band::Far
    }
}

/// Scans every camera and keeps the nearest one per band. Equal distances go
/// to the lower camera id.
pub fn classify<'a>(position: &Coordinate, cameras: &'a [Camera]) -> Classification<'a> {
    let mut out = Classification::default();
    for camera in cameras {
        let distance_m = haversine_m(position, &camera.position);
        let slot = match band_of(camera, distance_m) {
            Band::Detection => &mut out.nearest_in_detection,
            Band::Warning => &mut out.nearest_in_warning,
            Band::Far => continue,
        };
        let hit = Hit { camera, distance_m };
        if slot.map_or(true, |cur| closer(&hit, &cur)) {
            *slot = Some(hit);
        }
    }
    out
}

fn closer(a: &Hit<'_>, b: &Hit<'_>) -> bool {
    a.distance_m < b.distance_m || (a.distance_m == b.distance_m && a.camera.id < b.camera.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::destination;
    use model::CameraId;

    const ORIGIN: Coordinate = Coordinate { latitude: 42.6977, longitude: 23.3219 };

    fn cam(id: i64, position: Coordinate) -> Camera {
        Camera {
            id: CameraId(id),
            name: format!("cam-{id}"),
            position,
            speed_limit_kmh: 50,
            detection_radius_m: 60.0,
            warning_radius_m: 350.0,
        }
    }

    #[test]
    fn inside_detection_radius_is_detected() {
        for d in [0.0, 10.0, 45.0, 59.9] {
            for bearing in [0.0, 135.0, 270.0] {
                let c = cam(1, destination(&ORIGIN, bearing, d));
                let cams = [c];
                let cl = classify(&ORIGIN, &cams);
                assert_eq!(cl.nearest_in_detection.map(|h| h.camera.id), Some(CameraId(1)), "{d} m @ {bearing}");
                assert_eq!(cl.band(), Band::Detection);
            }
        }
    }

    #[test]
    fn warning_ring_is_exclusive_of_detection() {
        let cams = [cam(1, destination(&ORIGIN, 0.0, 200.0))];
        let cl = classify(&ORIGIN, &cams);
        assert!(cl.nearest_in_detection.is_none());
        assert_eq!(cl.nearest_in_warning.map(|h| h.camera.id), Some(CameraId(1)));
        assert_eq!(cl.band(), Band::Warning);

        let far = [cam(1, destination(&ORIGIN, 0.0, 351.0))];
        assert_eq!(classify(&ORIGIN, &far), Classification::default());
    }

    #[test]
    fn nearest_wins_and_ties_go_to_lowest_id() {
        let cams = [
            cam(9, destination(&ORIGIN, 90.0, 40.0)),
            cam(4, destination(&ORIGIN, 270.0, 25.0)),
            cam(3, destination(&ORIGIN, 90.0, 20.0)),
        ];
        let hit = classify(&ORIGIN, &cams).nearest_in_detection.unwrap();
        assert_eq!(hit.camera.id, CameraId(3));

        let same_spot = [cam(8, ORIGIN), cam(2, ORIGIN), cam(5, ORIGIN)];
        let hit = classify(&ORIGIN, &same_spot).nearest_in_detection.unwrap();
        assert_eq!(hit.camera.id, CameraId(2));
    }

    #[test]
    fn detection_takes_precedence() {
        let cams = [
            cam(1, destination(&ORIGIN, 0.0, 300.0)),
            cam(2, destination(&ORIGIN, 180.0, 50.0)),
        ];
        let cl = classify(&ORIGIN, &cams);
        assert!(cl.nearest_in_warning.is_some());
        let (band, hit) = cl.primary().unwrap();
        assert_eq!(band, Band::Detection);
        assert_eq!(hit.camera.id, CameraId(2));
    }

    #[test]
    fn empty_directory_never_triggers() {
        assert_eq!(classify(&ORIGIN, &[]).band(), Band::Far);
    }
}
