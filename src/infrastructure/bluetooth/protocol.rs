//! RC Vehicle Radio Protocol
//!
//! Identifiers and command encoding for the vehicle's BLE firmware.

use crate::domain::models::Command;
use crate::infrastructure::error::ConfigError;
use uuid::Uuid;

/// Advertised name of the vehicle
pub const DEVICE_NAME: &str = "BLE TANK";

/// Vehicle BLE Service UUID
pub const SERVICE_UUID: &str = "4fafc201-1fb5-459e-8fcc-c5c9c331914b";

/// Control Characteristic UUID - where drive commands are written
pub const CONTROL_CHAR_UUID: &str = "beb5483e-36e1-4688-b7f5-ea07361b26a8";

/// Sensor Characteristic UUID - readable and notifying
pub const SENSOR_CHAR_UUID: &str = "12345678-1234-1234-1234-123456789abc";

/// Raw bytes written to the control characteristic for a command
pub fn command_bytes(command: Command) -> &'static [u8] {
    match command {
        Command::Forward => b"f",
        Command::Backward => b"b",
        Command::Left => b"l",
        Command::Right => b"r",
        Command::Stop => b"s",
        Command::Capture => b"p",
        Command::Measure => b"m",
    }
}

/// Sensor characteristic values are UTF-8 text; invalid bytes are replaced
pub fn decode_sensor_value(value: &[u8]) -> String {
    String::from_utf8_lossy(value).trim_end_matches('\0').to_string()
}

/// Parse a configured UUID string
pub fn parse_uuid(field: &'static str, value: &str) -> Result<Uuid, ConfigError> {
    Uuid::parse_str(value.trim()).map_err(|e| ConfigError::InvalidUuid {
        field,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uuid() {
        let uuid = parse_uuid("service", SERVICE_UUID).unwrap();
        assert_eq!(uuid.as_u128() >> 96, 0x4fafc201);
        assert!(parse_uuid("service", "4fafc201").is_err());
    }

    #[test]
    fn test_command_bytes() {
        assert_eq!(command_bytes(Command::Forward), b"f");
        assert_eq!(command_bytes(Command::Stop), b"s");

        let mut seen: Vec<&[u8]> = Command::ALL.iter().map(|c| command_bytes(*c)).collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), Command::ALL.len());
    }

    #[test]
    fn test_decode_sensor_value() {
        assert_eq!(decode_sensor_value(b"23.5C\0"), "23.5C");
        assert_eq!(decode_sensor_value(&[0x34, 0xFF]), "4\u{FFFD}");
    }
}
