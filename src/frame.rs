// Transmit frame construction
//
// Frame format on the BLE write characteristic:
// [optional header, default 0xFF 0x55] [payload core] [line ending]
// No length or checksum byte is added.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Line ending appended after the payload core
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LineEnding {
    Nl,
    Cr,
    #[default]
    Both,
    None,
}

impl LineEnding {
    pub fn bytes(self) -> &'static [u8] {
        match self {
            LineEnding::Nl => b"\n",
            LineEnding::Cr => b"\r",
            LineEnding::Both => b"\r\n",
            LineEnding::None => b"",
        }
    }

    /// Next mode in the cycle BOTH -> NL -> CR -> NONE -> BOTH
    pub fn next(self) -> Self {
        match self {
            LineEnding::Both => LineEnding::Nl,
            LineEnding::Nl => LineEnding::Cr,
            LineEnding::Cr => LineEnding::None,
            LineEnding::None => LineEnding::Both,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LineEnding::Nl => "NL",
            LineEnding::Cr => "CR",
            LineEnding::Both => "BOTH",
            LineEnding::None => "NONE",
        }
    }
}

impl fmt::Display for LineEnding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown line ending '{0}' (expected NL, CR, BOTH or NONE)")]
pub struct ParseLineEndingError(String);

impl FromStr for LineEnding {
    type Err = ParseLineEndingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NL" => Ok(LineEnding::Nl),
            "CR" => Ok(LineEnding::Cr),
            "BOTH" => Ok(LineEnding::Both),
            "NONE" => Ok(LineEnding::None),
            _ => Err(ParseLineEndingError(s.to_string())),
        }
    }
}

/// Build a transmit frame: header (if enabled and non-empty) + core + line ending
pub fn build_frame(core: &[u8], header_on: bool, header: &[u8], line_ending: LineEnding) -> Vec<u8> {
    let ending = line_ending.bytes();
    let header: &[u8] = if header_on { header } else { &[] };

    let mut frame = Vec::with_capacity(header.len() + core.len() + ending.len());
    frame.extend_from_slice(header);
    frame.extend_from_slice(core);
    frame.extend_from_slice(ending);
    frame
}

/// Render bytes as space-separated hex, for logs
pub fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: [u8; 2] = [0xFF, 0x55];

    #[test]
    fn test_build_frame_with_header_and_crlf() {
        let frame = build_frame(&[0x46], true, &HEADER, LineEnding::Both);
        assert_eq!(frame, vec![0xFF, 0x55, 0x46, 0x0D, 0x0A]);
    }

    #[test]
    fn test_build_frame_no_header_no_ending() {
        let frame = build_frame(&[0x46], false, &HEADER, LineEnding::None);
        assert_eq!(frame, vec![0x46]);
    }

    #[test]
    fn test_empty_header_is_skipped() {
        let frame = build_frame(b"S", true, &[], LineEnding::Nl);
        assert_eq!(frame, vec![b'S', 0x0A]);
    }

    #[test]
    fn test_line_ending_bytes() {
        assert_eq!(LineEnding::Nl.bytes(), &[0x0A]);
        assert_eq!(LineEnding::Cr.bytes(), &[0x0D]);
        assert_eq!(LineEnding::Both.bytes(), &[0x0D, 0x0A]);
        assert!(LineEnding::None.bytes().is_empty());
    }

    #[test]
    fn test_cycle_order_and_length() {
        let start = LineEnding::Both;
        let order: Vec<_> = std::iter::successors(Some(start), |m| Some(m.next()))
            .take(5)
            .collect();
        assert_eq!(
            order,
            vec![
                LineEnding::Both,
                LineEnding::Nl,
                LineEnding::Cr,
                LineEnding::None,
                LineEnding::Both
            ]
        );
    }

    #[test]
    fn test_parse_line_ending() {
        assert_eq!("both".parse::<LineEnding>().unwrap(), LineEnding::Both);
        assert_eq!("NL".parse::<LineEnding>().unwrap(), LineEnding::Nl);
        assert!("LF".parse::<LineEnding>().is_err());
    }

    #[test]
    fn test_hex() {
        assert_eq!(hex(&[0xFF, 0x55, 0x0A]), "FF 55 0A");
        assert_eq!(hex(&[]), "");
    }
}
