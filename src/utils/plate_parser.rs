use crate::db::models::DetectionEvent;
use crate::error::Error;
use crate::utils::time_codec::TimeCodec;
use log::{debug, warn};
use yaserde::de::from_str;
use yaserde::xml::reader::{EventReader, XmlEvent as ReadEvent};
use yaserde::xml::writer::{EmitterConfig, XmlEvent as WriteEvent};
use yaserde_derive::{YaDeserialize, YaSerialize};

const PLATES_ROOT: &str = "Plates";

// Low-level XML structs (these match the device payload)
#[derive(Debug, YaSerialize, YaDeserialize, Default)]
#[yaserde(rename = "Plates")]
pub struct PlatesDocument {
    #[yaserde(rename = "Plate")]
    pub plates: Vec<PlateElement>,
}

#[derive(Debug, Clone, YaSerialize, YaDeserialize, Default)]
#[yaserde(rename = "Plate")]
pub struct PlateElement {
    #[yaserde(rename = "captureTime")]
    pub capture_time: Option<String>,

    #[yaserde(rename = "plateNumber")]
    pub plate_number: Option<String>,

    #[yaserde(rename = "picName")]
    pub pic_name: Option<String>,

    #[yaserde(rename = "country")]
    pub country: Option<String>,

    #[yaserde(rename = "direction")]
    pub direction: Option<String>,
}

/// Result of decoding one device response
#[derive(Debug, Default)]
pub struct ParsedPlates {
    /// Events in device order
    pub events: Vec<DetectionEvent>,
    /// Elements dropped because a field was missing or malformed
    pub rejected: usize,
}

fn required(value: &Option<String>, field: &str) -> Result<String, Error> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::MalformedEvent(format!("missing {}", field)))
}

impl PlateElement {
    /// Convert to a normalized event; a missing direction falls back to `default_direction`
    pub fn into_event(
        self,
        codec: &TimeCodec,
        default_direction: &str,
    ) -> Result<DetectionEvent, Error> {
        let capture_time = required(&self.capture_time, "captureTime")?;
        let plate_number = required(&self.plate_number, "plateNumber")?;
        let picture_name = required(&self.pic_name, "picName")?;
        let country = required(&self.country, "country")?;
        let direction =
            required(&self.direction, "direction").unwrap_or_else(|_| default_direction.to_string());

        Ok(DetectionEvent {
            capture_time: codec.from_device_local(&capture_time)?,
            plate_number,
            picture_name,
            country,
            direction,
        })
    }
}

/// Local name of the first element in `xml`, skipping the prolog, comments
/// and doctype.
fn root_element_name(xml: &str) -> Option<&str> {
    let mut rest = xml.trim_start_matches('\u{feff}');
    loop {
        rest = rest.trim_start();
        if let Some(after) = rest.strip_prefix("<?") {
            rest = &after[after.find("?>")? + 2..];
        } else if let Some(after) = rest.strip_prefix("<!--") {
            rest = &after[after.find("-->")? + 3..];
        } else if let Some(after) = rest.strip_prefix("<!") {
            rest = &after[after.find('>')? + 1..];
        } else if let Some(after) = rest.strip_prefix('<') {
            let end = after
                .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
                .unwrap_or(after.len());
            let qualified = &after[..end];
            return Some(qualified.rsplit(':').next().unwrap_or(qualified));
        } else {
            return None;
        }
    }
}

fn malformed(e: impl std::fmt::Display) -> Error {
    Error::MalformedResponse(format!("Failed to parse plates: {}", e))
}

/// Re-emit `xml` with namespace declarations and element prefixes removed.
///
/// Firmware differs in the default namespace it declares on `Plates`
/// (`hikvision.com/ver20` or `isapi.org/ver20`), while element names are the
/// same everywhere, so plates are matched by local name only.
fn strip_namespaces(xml: &str) -> Result<String, Error> {
    let mut writer = EmitterConfig::new()
        .write_document_declaration(false)
        .create_writer(Vec::with_capacity(xml.len()));

    for event in EventReader::new(xml.as_bytes()) {
        match event.map_err(malformed)? {
            ReadEvent::StartElement {
                name, attributes, ..
            } => {
                let mut start = WriteEvent::start_element(name.local_name.as_str());
                for attribute in &attributes {
                    start = start.attr(attribute.name.local_name.as_str(), &attribute.value);
                }
                writer.write(start).map_err(malformed)?;
            }
            ReadEvent::EndElement { .. } => {
                writer.write(WriteEvent::end_element()).map_err(malformed)?;
            }
            ReadEvent::Characters(text) | ReadEvent::CData(text) => {
                writer
                    .write(WriteEvent::characters(&text))
                    .map_err(malformed)?;
            }
            _ => {}
        }
    }

    String::from_utf8(writer.into_inner()).map_err(malformed)
}

/// Parse the device's `Plates` document into raw elements.
///
/// A body without a `Plates` root holds no plates and yields an empty list.
pub fn parse_raw_plates(xml: &str) -> Result<Vec<PlateElement>, Error> {
    match root_element_name(xml) {
        Some(PLATES_ROOT) => {}
        other => {
            debug!("Response has no {} root (found {:?})", PLATES_ROOT, other);
            return Ok(Vec::new());
        }
    }

    let document: PlatesDocument = from_str(&strip_namespaces(xml)?).map_err(malformed)?;
    Ok(document.plates)
}

/// Decode a device response into normalized events, skipping bad elements
pub fn parse_plates(
    xml: &str,
    codec: &TimeCodec,
    default_direction: &str,
) -> Result<ParsedPlates, Error> {
    let mut parsed = ParsedPlates::default();

    for (index, element) in parse_raw_plates(xml)?.into_iter().enumerate() {
        let pic_name = element.pic_name.clone().unwrap_or_default();
        match element.into_event(codec, default_direction) {
            Ok(event) => parsed.events.push(event),
            Err(e) => {
                warn!("Skipping plate #{} (picName '{}'): {}", index, pic_name, e);
                parsed.rejected += 1;
            }
        }
    }

    Ok(parsed)
}
