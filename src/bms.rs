//! Battery management system protocol.
//!
//! The BMS answers a fixed "read basic info" request with a notification
//! framed as `DD <command> <status> <length> <data...>`. Only the basic info
//! response is decoded; everything else is dropped without complaint.

/// Read basic info. Checksum footer is precomputed.
pub const REQUEST_BASIC_INFO: [u8; 7] = [0xDD, 0xA5, 0x03, 0x00, 0xFF, 0xFD, 0x77];

const FRAME_START: u8 = 0xDD;
const CMD_BASIC_INFO: u8 = 0x03;
const MIN_FRAME_LEN: usize = 4;
const BASIC_INFO_LEN: usize = 13;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BatteryStatus {
    /// Pack voltage in volts.
    pub voltage: f32,
    /// Pack current in amps, negative while discharging.
    pub current: f32,
    /// Derived, `voltage * current`.
    pub power: f32,
    /// State of charge in percent, exactly as the BMS reports it.
    pub soc: u8,
}

/// Decode a notification payload. Returns `None` for anything that is not a
/// complete basic info response.
pub fn decode(frame: &[u8]) -> Option<BatteryStatus> {
    if frame.len() < MIN_FRAME_LEN || frame[0] != FRAME_START {
        return None;
    }

    match frame[1] {
        CMD_BASIC_INFO if frame.len() >= BASIC_INFO_LEN => {
            let voltage = f32::from(u16::from_be_bytes([frame[4], frame[5]])) / 100.0;
            let current = f32::from(i16::from_be_bytes([frame[6], frame[7]])) / 100.0;
            Some(BatteryStatus {
                voltage,
                current,
                power: voltage * current,
                soc: frame[10],
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC_INFO: [u8; 13] = [0xDD, 0x03, 0, 0, 0x09, 0xC4, 0x00, 0x64, 0, 0, 50, 0, 0];

    #[test]
    fn test_decode_basic_info() {
        let status = decode(&BASIC_INFO).unwrap();
        assert_eq!(
            status,
            BatteryStatus {
                voltage: 25.0,
                current: 1.0,
                power: 25.0,
                soc: 50,
            }
        );
    }

    #[test]
    fn test_negative_current() {
        let mut frame = BASIC_INFO;
        // -250 => -2.5 A
        frame[6..8].copy_from_slice(&(-250i16).to_be_bytes());
        let status = decode(&frame).unwrap();
        assert_eq!(status.current, -2.5);
        assert_eq!(status.power, -62.5);
    }

    #[test]
    fn test_wrong_header() {
        let mut frame = BASIC_INFO;
        frame[0] = 0xAA;
        assert_eq!(decode(&frame), None);
    }

    #[test]
    fn test_too_short() {
        assert_eq!(decode(&[]), None);
        assert_eq!(decode(&[0xDD, 0x03]), None);
        assert_eq!(decode(&BASIC_INFO[..12]), None);
    }

    #[test]
    fn test_unknown_command() {
        let mut frame = BASIC_INFO;
        frame[1] = 0x04;
        assert_eq!(decode(&frame), None);
    }

    #[test]
    fn test_soc_is_passed_through() {
        let mut frame = BASIC_INFO;
        frame[10] = 0xFF;
        assert_eq!(decode(&frame).unwrap().soc, 0xFF);
    }

    #[test]
    fn test_request_bytes() {
        assert_eq!(hex(&REQUEST_BASIC_INFO), "dda50300fffd77");
    }

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }
}
