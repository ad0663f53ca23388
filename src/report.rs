//! # Location Reporting
//!
//! Builds the compact `loc` event payload for acquired points and pairs the
//! cloud link with the monotonically increasing request sequence.

use serde_json::json;
use tracing::debug;

use crate::error::{LocateError, Result};
use crate::modem::CloudLink;
use crate::point::LocationPoint;

/// Event name used for published locations.
pub const LOCATION_EVENT: &str = "loc";

/// Maximum size of a published location event payload in bytes.
///
/// A payload over this bound is reported as an explicit error, never
/// truncated into invalid JSON.
pub const PUBLISH_BUFFER_LIMIT: usize = 1024;

/// Round to a fixed number of decimals, the wire precision of each field.
fn round_f64(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

fn round_f32(value: f32, decimals: i32) -> f64 {
    round_f64(value as f64, decimals)
}

/// Build the `loc` event payload for a point.
///
/// Numeric fields are rounded to their wire precision before serialization so
/// the payload round-trips losslessly: lat/lon at 8 decimals, altitude and
/// accuracies at 3, heading and speed at 2, HDOP and time-to-first-fix at 1.
/// An unlocked point publishes only the lock flag.
pub fn build_location_event(point: &LocationPoint, req_id: u32) -> Result<String> {
    let loc = if point.fix == 0 {
        json!({ "lck": 0 })
    } else {
        let mut loc = serde_json::Map::new();
        loc.insert("lck".into(), json!(1));
        loc.insert("time".into(), json!(point.epoch_time));
        loc.insert("lat".into(), json!(round_f64(point.latitude, 8)));
        loc.insert("lon".into(), json!(round_f64(point.longitude, 8)));
        loc.insert("alt".into(), json!(round_f32(point.altitude, 3)));
        loc.insert("hd".into(), json!(round_f32(point.heading, 2)));
        loc.insert("spd".into(), json!(round_f32(point.speed, 2)));
        loc.insert("hdop".into(), json!(round_f32(point.horizontal_dop, 1)));
        if point.horizontal_accuracy > 0.0 {
            loc.insert("h_acc".into(), json!(round_f32(point.horizontal_accuracy, 3)));
        }
        if point.vertical_accuracy > 0.0 {
            loc.insert("v_acc".into(), json!(round_f32(point.vertical_accuracy, 3)));
        }
        loc.insert("nsat".into(), json!(point.sats_in_use));
        loc.insert("ttff".into(), json!(round_f32(point.time_to_first_fix, 1)));
        serde_json::Value::Object(loc)
    };

    let mut event = serde_json::Map::new();
    event.insert("cmd".into(), json!(LOCATION_EVENT));
    if point.system_time != 0 {
        event.insert("time".into(), json!(point.system_time));
    }
    event.insert("loc".into(), loc);
    event.insert("req_id".into(), json!(req_id));

    let payload = serde_json::Value::Object(event).to_string();
    if payload.len() > PUBLISH_BUFFER_LIMIT {
        return Err(LocateError::PayloadTooLarge {
            size: payload.len(),
            limit: PUBLISH_BUFFER_LIMIT,
        });
    }

    Ok(payload)
}

/// Cloud publisher for acquired locations.
///
/// Owns the connectivity link and the request sequence; the sequence advances
/// only when the cloud accepts an event.
pub struct LocationPublisher {
    link: Box<dyn CloudLink>,
    req_id: u32,
}

impl LocationPublisher {
    pub fn new(link: Box<dyn CloudLink>) -> Self {
        Self { link, req_id: 1 }
    }

    /// Whether the device currently has cloud connectivity.
    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Request sequence number the next accepted publish will carry.
    pub fn request_sequence(&self) -> u32 {
        self.req_id
    }

    /// Publish a `loc` event for `point`; returns whether the cloud accepted
    /// the event.
    pub async fn publish_point(&mut self, point: &LocationPoint) -> Result<bool> {
        let payload = build_location_event(point, self.req_id)?;
        debug!("publishing {} event ({} bytes)", LOCATION_EVENT, payload.len());

        let accepted = self.link.publish(LOCATION_EVENT, &payload).await;
        if accepted {
            self.req_id += 1;
        }

        Ok(accepted)
    }
}
