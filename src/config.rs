//! # Configuration Module
//!
//! Acquisition configuration: constellation selection, fix-quality thresholds
//! and timing, loadable from TOML files or built programmatically.

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{LocateError, Result};

/// Default constellation selection (GPS + GLONASS)
fn default_constellation() -> Constellation {
    Constellation::default()
}

/// Default HDOP threshold for a stable fix
fn default_hdop_threshold() -> i32 {
    100
}

/// Default horizontal accuracy threshold in meters
fn default_hacc_threshold() -> f32 {
    50.0
}

/// Default maximum time to wait for a position fix, in seconds
fn default_max_fix_seconds() -> u64 {
    90
}

/// Bitmap of GNSS constellations enabled alongside GPS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constellation(u8);

impl Constellation {
    /// GPS with no secondary constellation
    pub const GPS_ONLY: Constellation = Constellation(0);
    /// GPS + GLONASS
    pub const GPS_GLONASS: Constellation = Constellation(1 << 0);
    /// GPS + BeiDou
    pub const GPS_BEIDOU: Constellation = Constellation(1 << 1);
    /// GPS + Galileo
    pub const GPS_GALILEO: Constellation = Constellation(1 << 2);
    /// GPS + QZSS
    pub const GPS_QZSS: Constellation = Constellation(1 << 3);

    /// Whether any of `flags` is selected.
    pub fn contains(self, flags: Constellation) -> bool {
        self.0 & flags.0 != 0
    }

    /// Map the selection to the modem's `gnssconfig` index.
    ///
    /// GLONASS wins over the other secondary constellations when several are
    /// selected, matching the receiver's configuration priority.
    pub(crate) fn gnss_config_index(self) -> u8 {
        if self == Self::GPS_ONLY || self.contains(Self::GPS_GLONASS) {
            1
        } else if self.contains(Self::GPS_BEIDOU) {
            2
        } else if self.contains(Self::GPS_GALILEO) {
            3
        } else if self.contains(Self::GPS_QZSS) {
            4
        } else {
            1
        }
    }
}

impl Default for Constellation {
    fn default() -> Self {
        Constellation::GPS_GLONASS
    }
}

impl std::ops::BitOr for Constellation {
    type Output = Constellation;

    fn bitor(self, rhs: Constellation) -> Constellation {
        Constellation(self.0 | rhs.0)
    }
}

impl<'de> Deserialize<'de> for Constellation {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let names = Vec::<String>::deserialize(deserializer)?;
        let mut flags = Constellation::GPS_ONLY;
        for name in &names {
            flags = flags
                | match name.as_str() {
                    "gps" => Constellation::GPS_ONLY,
                    "glonass" => Constellation::GPS_GLONASS,
                    "beidou" => Constellation::GPS_BEIDOU,
                    "galileo" => Constellation::GPS_GALILEO,
                    "qzss" => Constellation::GPS_QZSS,
                    other => {
                        return Err(serde::de::Error::custom(format!(
                            "unknown constellation: {}",
                            other
                        )))
                    }
                };
        }
        Ok(flags)
    }
}

/// Acquisition configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LocationConfig {
    /// Constellations to enable alongside GPS
    #[serde(default = "default_constellation")]
    pub constellation: Constellation,

    /// GPIO pin switching power to an active GNSS antenna, if one is fitted
    #[serde(default)]
    pub antenna_power_pin: Option<u32>,

    /// HDOP threshold for a stable fix, clamped to 0..=100
    #[serde(default = "default_hdop_threshold")]
    pub hdop_threshold: i32,

    /// Horizontal accuracy threshold for a stable fix, in meters
    #[serde(default = "default_hacc_threshold")]
    pub hacc_threshold: f32,

    /// Maximum time to wait for a position fix, in seconds
    #[serde(default = "default_max_fix_seconds")]
    pub max_fix_seconds: u64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            constellation: default_constellation(),
            antenna_power_pin: None,
            hdop_threshold: default_hdop_threshold(),
            hacc_threshold: default_hacc_threshold(),
            max_fix_seconds: default_max_fix_seconds(),
        }
    }
}

impl LocationConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, TOML parsing fails or
    /// validation fails.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: LocationConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config.normalized())
    }

    /// Set the constellation selection.
    pub fn with_constellation(mut self, constellation: Constellation) -> Self {
        self.constellation = constellation;
        self
    }

    /// Set the GPIO pin that powers an active GNSS antenna.
    pub fn with_antenna_power_pin(mut self, pin: u32) -> Self {
        self.antenna_power_pin = Some(pin);
        self
    }

    /// Set the HDOP threshold for a stable fix; values outside 0..=100 are
    /// clamped.
    pub fn with_hdop_threshold(mut self, hdop: i32) -> Self {
        self.hdop_threshold = hdop.clamp(0, 100);
        self
    }

    /// Set the horizontal accuracy threshold in meters.
    pub fn with_hacc_threshold(mut self, meters: f32) -> Self {
        self.hacc_threshold = meters;
        self
    }

    /// Set the maximum time to wait for a position fix.
    pub fn with_maximum_fix_time(mut self, seconds: u64) -> Self {
        self.max_fix_seconds = seconds;
        self
    }

    /// Clamp values that have a bounded range.
    pub(crate) fn normalized(mut self) -> Self {
        self.hdop_threshold = self.hdop_threshold.clamp(0, 100);
        self
    }

    /// Validate configuration values.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_fix_seconds == 0 {
            return Err(LocateError::InvalidConfig(
                "max_fix_seconds must be greater than 0".to_string(),
            ));
        }

        if !self.hacc_threshold.is_finite() || self.hacc_threshold < 0.0 {
            return Err(LocateError::InvalidConfig(
                "hacc_threshold must be a non-negative number".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LocationConfig::default();
        assert_eq!(config.constellation, Constellation::GPS_GLONASS);
        assert_eq!(config.antenna_power_pin, None);
        assert_eq!(config.hdop_threshold, 100);
        assert_eq!(config.hacc_threshold, 50.0);
        assert_eq!(config.max_fix_seconds, 90);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_hdop_threshold_clamped_by_setter() {
        let config = LocationConfig::default().with_hdop_threshold(150);
        assert_eq!(config.hdop_threshold, 100);

        let config = LocationConfig::default().with_hdop_threshold(-5);
        assert_eq!(config.hdop_threshold, 0);

        let config = LocationConfig::default().with_hdop_threshold(42);
        assert_eq!(config.hdop_threshold, 42);
    }

    #[test]
    fn test_hdop_threshold_clamped_on_normalize() {
        let mut config = LocationConfig::default();
        config.hdop_threshold = 400;
        assert_eq!(config.normalized().hdop_threshold, 100);
    }

    #[test]
    fn test_zero_fix_time_rejected() {
        let mut config = LocationConfig::default();
        config.max_fix_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_hacc_rejected() {
        let mut config = LocationConfig::default();
        config.hacc_threshold = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_gnss_config_index_priority() {
        assert_eq!(Constellation::GPS_ONLY.gnss_config_index(), 1);
        assert_eq!(Constellation::GPS_GLONASS.gnss_config_index(), 1);
        assert_eq!(Constellation::GPS_BEIDOU.gnss_config_index(), 2);
        assert_eq!(Constellation::GPS_GALILEO.gnss_config_index(), 3);
        assert_eq!(Constellation::GPS_QZSS.gnss_config_index(), 4);

        // GLONASS wins when several secondaries are selected
        let mixed = Constellation::GPS_GLONASS | Constellation::GPS_BEIDOU;
        assert_eq!(mixed.gnss_config_index(), 1);

        let mixed = Constellation::GPS_BEIDOU | Constellation::GPS_QZSS;
        assert_eq!(mixed.gnss_config_index(), 2);
    }

    #[test]
    fn test_load_config_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let toml_content = r#"
constellation = ["glonass", "galileo"]
hdop_threshold = 250
hacc_threshold = 25.0
max_fix_seconds = 120
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = LocationConfig::load(temp_file.path()).unwrap();
        assert!(config.constellation.contains(Constellation::GPS_GLONASS));
        assert!(config.constellation.contains(Constellation::GPS_GALILEO));
        // Out-of-range HDOP comes back clamped
        assert_eq!(config.hdop_threshold, 100);
        assert_eq!(config.hacc_threshold, 25.0);
        assert_eq!(config.max_fix_seconds, 120);
        assert_eq!(config.antenna_power_pin, None);
    }

    #[test]
    fn test_load_empty_file_gives_defaults() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"").unwrap();
        temp_file.flush().unwrap();

        let config = LocationConfig::load(temp_file.path()).unwrap();
        assert_eq!(config.hdop_threshold, 100);
        assert_eq!(config.max_fix_seconds, 90);
    }

    #[test]
    fn test_unknown_constellation_rejected() {
        let result: std::result::Result<LocationConfig, _> =
            toml::from_str(r#"constellation = ["glonass", "navic"]"#);
        assert!(result.is_err());
    }
}
