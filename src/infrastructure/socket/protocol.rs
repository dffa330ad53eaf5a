//! RC Vehicle Socket Protocol
//!
//! Outbound frames are bare command words. Inbound text frames are either a
//! JSON object with optional `sensors` and `img` (Base64) fields or a plain
//! sensor reading.

use crate::domain::image::decode_image;
use crate::domain::models::{Command, ConnectionState, SocketPayload};
use serde::Deserialize;
use tracing::warn;

/// Address of the vehicle's access point
pub const DEFAULT_URL: &str = "ws://192.168.4.1/ws";

pub fn command_message(command: Command) -> &'static str {
    match command {
        Command::Forward => "forward",
        Command::Backward => "backward",
        Command::Left => "left",
        Command::Right => "right",
        Command::Stop => "stop",
        Command::Capture => "photo",
        Command::Measure => "measure",
    }
}

#[derive(Debug, Default, Deserialize)]
struct Frame {
    #[serde(default)]
    sensors: Option<String>,
    #[serde(default)]
    img: Option<String>,
}

/// Interpret an inbound text frame
pub fn parse_frame(text: &str) -> SocketPayload {
    let frame = match serde_json::from_str::<Frame>(text) {
        Ok(frame) => frame,
        Err(_) => Frame {
            sensors: Some(text.trim().to_string()),
            img: None,
        },
    };

    let image = frame.img.and_then(|encoded| match decode_image(&encoded) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!("Dropping photo: {}", e);
            None
        }
    });

    SocketPayload {
        connection: ConnectionState::Connected,
        sensors: frame.sensors.unwrap_or_default(),
        image,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_words() {
        assert_eq!(command_message(Command::Capture), "photo");
        assert_eq!(command_message(Command::Backward), "backward");
    }

    #[test]
    fn test_plain_text_is_sensor_reading() {
        let payload = parse_frame("17cm\n");
        assert_eq!(payload.sensors, "17cm");
        assert_eq!(payload.image, None);

        // Valid JSON that is not an object is still a reading
        assert_eq!(parse_frame("42").sensors, "42");
    }

    #[test]
    fn test_json_frame_with_photo() {
        let payload = parse_frame(r#"{"sensors": "9cm", "img": "/9j/4A=="}"#);
        assert_eq!(payload.sensors, "9cm");
        assert_eq!(payload.image, Some(vec![0xFF, 0xD8, 0xFF, 0xE0]));
    }

    #[test]
    fn test_bad_photo_is_dropped() {
        let payload = parse_frame(r#"{"img": "***"}"#);
        assert_eq!(payload.sensors, "");
        assert_eq!(payload.image, None);
        assert_eq!(payload.connection, ConnectionState::Connected);
    }
}
