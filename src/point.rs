//! # Location Point
//!
//! The result record filled in by the acquisition engine.

/// A single GNSS position result.
///
/// Created empty by the caller and handed to the locator, which fills it in
/// across repeated position polls during an acquisition attempt. Fields are
/// only guaranteed complete and consistent once the attempt finishes with
/// [`crate::AcquireOutcome::Fixed`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationPoint {
    /// GNSS lock indication as reported by the modem (0 = no lock)
    pub fix: u32,

    /// Epoch time of the fix, from the satellite data
    pub epoch_time: i64,

    /// System epoch time captured at the first good fix of the attempt
    pub system_time: i64,

    /// Latitude in degrees
    pub latitude: f64,

    /// Longitude in degrees
    pub longitude: f64,

    /// Altitude in meters
    pub altitude: f32,

    /// Ground speed in meters per second
    pub speed: f32,

    /// Heading in degrees
    pub heading: f32,

    /// Horizontal accuracy estimate in meters
    pub horizontal_accuracy: f32,

    /// Horizontal dilution of precision
    pub horizontal_dop: f32,

    /// Vertical accuracy estimate in meters
    pub vertical_accuracy: f32,

    /// Vertical dilution of precision
    pub vertical_dop: f32,

    /// Time to first fix in seconds
    pub time_to_first_fix: f32,

    /// Number of satellites used in the fix
    pub sats_in_use: u32,
}

impl LocationPoint {
    /// Create an empty point ready to hand to the locator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the point currently carries a GNSS lock.
    pub fn is_locked(&self) -> bool {
        self.fix != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_point_is_empty() {
        let point = LocationPoint::new();
        assert_eq!(point, LocationPoint::default());
        assert!(!point.is_locked());
        assert_eq!(point.latitude, 0.0);
        assert_eq!(point.sats_in_use, 0);
    }

    #[test]
    fn test_locked_when_fix_reported() {
        let mut point = LocationPoint::new();
        point.fix = 3;
        assert!(point.is_locked());
    }
}
