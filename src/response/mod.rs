//! # Response Parser
//!
//! Stateless decoding of raw modem reply text into structured fix data.
//!
//! Two reply formats are understood: the positional `+QGPSLOC` report and the
//! `+QGPSCFG: "estimation_error"` accuracy report. Device-reported `+CME
//! ERROR` codes are decoded into [`ModemFault`] values that drive the
//! acquisition state machine. All functions here expect reply text with
//! transport framing already removed (see [`strip_crlf`]).

use chrono::NaiveDate;

use crate::point::LocationPoint;

/// Prefix of a positional report reply
const QGPSLOC_PREFIX: &str = "+QGPSLOC:";

/// Comma-separated fields in a positional report
const QGPSLOC_FIELDS: usize = 11;

/// Prefix of an accuracy-estimate reply
const QGPSCFG_PREFIX: &str = "+QGPSCFG:";

/// Tag field of an accuracy-estimate reply
const ESTIMATION_ERROR_TAG: &str = "\"estimation_error\"";

/// Device error pattern in a reply
const CME_ERROR_PREFIX: &str = "+CME ERROR:";

/// Ground speed arrives in km/h and is stored in m/s
const KMH_TO_MPS: f32 = 1000.0 / 3600.0;

/// Two-digit years in the positional report count from 2000
const GPS_YEAR_BASE: u32 = 2000;

/// Decoded device-reported error state of one reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModemFault {
    /// No device error pattern in the reply
    None,
    /// A position sample was decoded from the reply
    Fix,
    /// 504: session is ongoing
    SessionOngoing,
    /// 505: session not active
    SessionNotActive,
    /// 506: operation timeout
    OperationTimeout,
    /// 516: no fix yet
    NoFix,
    /// 522: GNSS is working
    GnssWorking,
    /// 549: unknown error
    UnknownError,
    /// Any other reported code
    Undefined,
}

/// Remove transport framing (`\r`, `\n`) from a raw reply line, preserving
/// every other byte. The parsers expect their input preprocessed this way.
pub fn strip_crlf(raw: &str) -> String {
    raw.chars().filter(|&c| c != '\r' && c != '\n').collect()
}

/// Scan a reply for a device error report.
///
/// Known codes map to their named fault, any other numeric code maps to
/// [`ModemFault::Undefined`], and absence of the pattern is
/// [`ModemFault::None`] — a reply without an error report is a normal data
/// line, not a failure.
pub fn parse_fault(reply: &str) -> ModemFault {
    let Some(start) = reply.find(CME_ERROR_PREFIX) else {
        return ModemFault::None;
    };

    let rest = reply[start + CME_ERROR_PREFIX.len()..].trim_start();
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    let Ok(code) = digits.parse::<u32>() else {
        return ModemFault::None;
    };

    match code {
        504 => ModemFault::SessionOngoing,
        505 => ModemFault::SessionNotActive,
        506 => ModemFault::OperationTimeout,
        516 => ModemFault::NoFix,
        522 => ModemFault::GnssWorking,
        549 => ModemFault::UnknownError,
        _ => ModemFault::Undefined,
    }
}

/// One decoded positional report.
///
/// Transient: lives for a single parse call before being folded into a
/// [`LocationPoint`] with [`FixSample::apply`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixSample {
    /// UTC hour of the fix
    pub hour: u32,
    /// UTC minute of the fix
    pub minute: u32,
    /// UTC second of the fix
    pub second: u32,
    /// UTC day of month
    pub day: u32,
    /// UTC month, 1-based
    pub month: u32,
    /// UTC year counted from 2000
    pub year: u32,
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Horizontal dilution of precision
    pub hdop: f32,
    /// Altitude in meters
    pub altitude: f32,
    /// Lock flag as reported by the modem
    pub fix: u32,
    /// Course over ground, whole degrees
    pub cog_degrees: u32,
    /// Course over ground, arc minutes
    pub cog_minutes: u32,
    /// Ground speed in km/h
    pub speed_kmh: f32,
    /// Ground speed in knots
    pub speed_knots: f32,
    /// Satellites used in the fix
    pub sats_in_use: u32,
}

impl FixSample {
    /// Decode a positional report of the form
    /// `+QGPSLOC: <HHMMSS.hh>,<lat>,<lon>,<HDOP>,<alt>,<fix>,<COGddd.mm>,<spkm>,<spkn>,<DDMMYY>,<nsat>`.
    ///
    /// Returns `None` unless the reply carries exactly the expected field
    /// count; a failed parse never partially populates anything.
    pub fn parse(reply: &str) -> Option<FixSample> {
        let start = reply.find(QGPSLOC_PREFIX)?;
        let body = reply[start + QGPSLOC_PREFIX.len()..].trim();

        let fields: Vec<&str> = body.split(',').collect();
        if fields.len() != QGPSLOC_FIELDS {
            return None;
        }

        let (hour, minute, second) = parse_clock_field(fields[0])?;
        let latitude: f64 = fields[1].trim().parse().ok()?;
        let longitude: f64 = fields[2].trim().parse().ok()?;
        let hdop: f32 = fields[3].trim().parse().ok()?;
        let altitude: f32 = fields[4].trim().parse().ok()?;
        let fix: u32 = fields[5].trim().parse().ok()?;
        let (cog_degrees, cog_minutes) = parse_course_field(fields[6])?;
        let speed_kmh: f32 = fields[7].trim().parse().ok()?;
        let speed_knots: f32 = fields[8].trim().parse().ok()?;
        let (day, month, year) = parse_date_field(fields[9])?;
        let sats_in_use: u32 = fields[10].trim().parse().ok()?;

        Some(FixSample {
            hour,
            minute,
            second,
            day,
            month,
            year,
            latitude,
            longitude,
            hdop,
            altitude,
            fix,
            cog_degrees,
            cog_minutes,
            speed_kmh,
            speed_knots,
            sats_in_use,
        })
    }

    /// Epoch seconds for the embedded UTC date and time, or `None` when the
    /// fields do not form a valid calendar moment.
    pub fn epoch_time(&self) -> Option<i64> {
        let date =
            NaiveDate::from_ymd_opt((self.year + GPS_YEAR_BASE) as i32, self.month, self.day)?;
        let moment = date.and_hms_opt(self.hour, self.minute, self.second)?;
        Some(moment.and_utc().timestamp())
    }

    /// Fold this sample into `point`.
    ///
    /// Converts the UTC calendar fields to an absolute epoch timestamp, stores
    /// ground speed in m/s and derives heading from the degrees/minutes course
    /// encoding.
    pub fn apply(&self, point: &mut LocationPoint) {
        if let Some(epoch) = self.epoch_time() {
            point.epoch_time = epoch;
        }
        point.fix = self.fix;
        point.latitude = self.latitude;
        point.longitude = self.longitude;
        point.altitude = self.altitude;
        point.speed = self.speed_kmh * KMH_TO_MPS;
        point.heading = self.cog_degrees as f32 + self.cog_minutes as f32 / 60.0;
        point.horizontal_dop = self.hdop;
        point.sats_in_use = self.sats_in_use;
    }
}

/// One decoded accuracy-estimate report.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AccuracySample {
    /// Horizontal accuracy in meters
    pub horizontal: f32,
    /// Vertical accuracy in meters
    pub vertical: f32,
    /// Speed accuracy in m/s
    pub speed: f32,
    /// Heading accuracy in degrees
    pub heading: f32,
}

impl AccuracySample {
    /// Decode an accuracy report of the form
    /// `+QGPSCFG: "estimation_error",<h_acc>,<v_acc>,<speed_acc>,<head_acc>`.
    pub fn parse(reply: &str) -> Option<AccuracySample> {
        let start = reply.find(QGPSCFG_PREFIX)?;
        let body = reply[start + QGPSCFG_PREFIX.len()..].trim();

        let fields: Vec<&str> = body.split(',').collect();
        if fields.len() != 5 || fields[0].trim() != ESTIMATION_ERROR_TAG {
            return None;
        }

        Some(AccuracySample {
            horizontal: fields[1].trim().parse().ok()?,
            vertical: fields[2].trim().parse().ok()?,
            speed: fields[3].trim().parse().ok()?,
            heading: fields[4].trim().parse().ok()?,
        })
    }
}

/// Decode one raw position reply into `point`.
///
/// A `NoFix` fault clears the point's lock flag and is passed through so the
/// caller can track missed samples. Any other device fault means the module is
/// still bringing its session up and is absorbed as [`ModemFault::None`]. A
/// successful sample decode applies to the point and reports
/// [`ModemFault::Fix`].
pub fn parse_position_reply(reply: &str, point: &mut LocationPoint) -> ModemFault {
    match parse_fault(reply) {
        ModemFault::NoFix => {
            point.fix = 0;
            ModemFault::NoFix
        }
        ModemFault::None => match FixSample::parse(reply) {
            Some(sample) => {
                sample.apply(point);
                ModemFault::Fix
            }
            None => ModemFault::None,
        },
        _ => ModemFault::None,
    }
}

/// Decode one raw accuracy-estimate reply into `point`.
///
/// Device faults leave the point untouched. Speed and heading accuracy are
/// decoded but not surfaced on the point.
pub fn parse_accuracy_reply(reply: &str, point: &mut LocationPoint) {
    if parse_fault(reply) != ModemFault::None {
        return;
    }

    if let Some(sample) = AccuracySample::parse(reply) {
        point.horizontal_accuracy = sample.horizontal;
        point.vertical_accuracy = sample.vertical;
    }
}

/// Split a `HHMMSS.hh` clock field; the fractional part is discarded.
fn parse_clock_field(field: &str) -> Option<(u32, u32, u32)> {
    let digits = field.trim().split('.').next()?;
    if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((
        digits[0..2].parse().ok()?,
        digits[2..4].parse().ok()?,
        digits[4..6].parse().ok()?,
    ))
}

/// Split a `DDMMYY` date field.
fn parse_date_field(field: &str) -> Option<(u32, u32, u32)> {
    let digits = field.trim();
    if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((
        digits[0..2].parse().ok()?,
        digits[2..4].parse().ok()?,
        digits[4..6].parse().ok()?,
    ))
}

/// Split a `ddd.mm` course-over-ground field into degrees and arc minutes.
fn parse_course_field(field: &str) -> Option<(u32, u32)> {
    let (degrees, minutes) = field.trim().split_once('.')?;
    Some((degrees.parse().ok()?, minutes.parse().ok()?))
}
