//! Capture metadata (camera, digitized timestamp, GPS) read from EXIF.

use std::io::Cursor;

use chrono::NaiveDateTime;
use exif::{Exif, In, Tag, Value};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};

const EXIF_DATE_TIME_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// Signed decimal degrees, south and west negative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPosition {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureMetadata {
    pub make: Option<String>,
    pub model: Option<String>,
    pub digitized: Option<NaiveDateTime>,
    pub gps: Option<GpsPosition>,
}

impl CaptureMetadata {
    /// Read metadata from an encoded image.
    ///
    /// Returns `None` when the file carries no EXIF block or none of the
    /// fields of interest.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let exif = match exif::Reader::new().read_from_container(&mut Cursor::new(bytes)) {
            Ok(exif) => exif,
            Err(e) => {
                tracing::trace!(error = %e, "no readable EXIF block");
                return None;
            }
        };

        let metadata = Self::from_exif(&exif);
        if metadata.is_empty() {
            None
        } else {
            Some(metadata)
        }
    }

    fn from_exif(exif: &Exif) -> Self {
        let digitized = ascii_field(exif, Tag::DateTimeDigitized).and_then(|s| {
            NaiveDateTime::parse_from_str(&s, EXIF_DATE_TIME_FORMAT)
                .map_err(|e| tracing::debug!(value = %s, error = %e, "unparseable DateTimeDigitized"))
                .ok()
        });

        Self {
            make: ascii_field(exif, Tag::Make),
            model: ascii_field(exif, Tag::Model),
            digitized,
            gps: gps_position(exif),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.make.is_none() && self.model.is_none() && self.digitized.is_none() && self.gps.is_none()
    }

    /// Mapping handed to presentation layers: `Make`, `Model`, `DateDigitized`,
    /// `TimeDigitized` and `GPSInfo: {Latitude, Longitude}`, each only when present.
    pub fn to_presentation(&self) -> serde_json::Value {
        let mut map = Map::new();
        if let Some(make) = &self.make {
            map.insert("Make".into(), json!(make));
        }
        if let Some(model) = &self.model {
            map.insert("Model".into(), json!(model));
        }
        if let Some(dt) = &self.digitized {
            map.insert("DateDigitized".into(), json!(dt.format("%Y:%m:%d").to_string()));
            map.insert("TimeDigitized".into(), json!(dt.format("%H:%M:%S").to_string()));
        }
        if let Some(gps) = &self.gps {
            map.insert(
                "GPSInfo".into(),
                json!({ "Latitude": gps.latitude, "Longitude": gps.longitude }),
            );
        }
        serde_json::Value::Object(map)
    }
}

/// Convert degrees/minutes/seconds plus a hemisphere reference to signed
/// decimal degrees rounded to six places.
pub fn dms_to_decimal(degrees: f64, minutes: f64, seconds: f64, hemisphere: u8) -> f64 {
    let mut decimal = degrees + minutes / 60.0 + seconds / 3600.0;
    if matches!(hemisphere.to_ascii_uppercase(), b'S' | b'W') {
        decimal = -decimal;
    }
    (decimal * 1e6).round() / 1e6
}

fn ascii_field(exif: &Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match field.value {
        Value::Ascii(ref vec) => vec
            .first()
            .map(|s| String::from_utf8_lossy(s).trim_matches('\0').trim().to_string())
            .filter(|s| !s.is_empty()),
        _ => None,
    }
}

fn coordinate(exif: &Exif, value_tag: Tag, ref_tag: Tag) -> Option<f64> {
    let field = exif.get_field(value_tag, In::PRIMARY)?;
    let parts = match field.value {
        Value::Rational(ref v) if !v.is_empty() => v,
        _ => return None,
    };
    let part = |i: usize| parts.get(i).map(|r| r.to_f64()).unwrap_or(0.0);

    let reference = exif.get_field(ref_tag, In::PRIMARY)?;
    let hemisphere = match reference.value {
        Value::Ascii(ref vec) => *vec.first().and_then(|s| s.first())?,
        _ => return None,
    };

    Some(dms_to_decimal(part(0), part(1), part(2), hemisphere))
}

fn gps_position(exif: &Exif) -> Option<GpsPosition> {
    Some(GpsPosition {
        latitude: coordinate(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef)?,
        longitude: coordinate(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef)?,
    })
}
