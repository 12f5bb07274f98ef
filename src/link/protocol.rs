//! # Command Link Protocol Constants and Types
//!
//! Wire-level definitions for the ground station command link.

use bytes::Bytes;

/// Command frame terminator
pub const FRAME_TERMINATOR: u8 = b'!';

/// Prefix of every frame addressed to the payload itself
pub const COMMAND_PREFIX: &str = "IMAGE;";

/// Generic command acknowledgment
pub const ACK: &[u8] = b"A";

/// Confirmation that an uploaded camera settings payload was applied
pub const SETTINGS_ACCEPTED: &[u8] = b"B";

/// Chunk accepted by the ground station
pub const CHUNK_ACCEPTED: u8 = b'Y';

/// Token sent repeatedly during the sync handshake
pub const SYNC_TOKEN: &[u8] = b"sync";

/// Ground station reply that ends the sync handshake
pub const SYNC_ACK: u8 = b'S';

/// Ping byte echoed back during ping tests
pub const PING: u8 = b'~';

/// Ends a ping test
pub const PING_DONE: u8 = b'D';

/// Marks the end of the image index listing
pub const INDEX_END: &[u8] = b"X\n";

/// Prefix of a requested-image line (`RQ;<file name>`)
pub const IMAGE_REQUEST_PREFIX: &str = "RQ;";

/// Prefix of a camera settings upload line (`RQ/<w,h,sh,b,c,sa,iso>`)
pub const SETTINGS_REQUEST_PREFIX: &str = "RQ/";

/// Commands the payload answers itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandCode {
    /// `1`: send the most recent image
    SendRecentImage,
    /// `2`: send the image index log
    SendImageIndex,
    /// `3`: send an image named by the ground station
    SendRequestedImage,
    /// `4`: send the camera settings
    SendCameraSettings,
    /// `5`: receive new camera settings
    ReceiveCameraSettings,
    /// `6`: acknowledged ping test
    PingTest,
    /// `7`: send the runtime log
    SendRuntimeLog,
    /// `8`: send the payload clock
    TimeSync,
    /// `9`: toggle horizontal flip
    HorizontalFlip,
    /// `0`: toggle vertical flip
    VerticalFlip,
    /// `~`: bare ping
    Ping,
    /// `-`: device status report
    StatusReport,
}

impl CommandCode {
    /// All codes in wire order
    pub const ALL: [CommandCode; 12] = [
        CommandCode::SendRecentImage,
        CommandCode::SendImageIndex,
        CommandCode::SendRequestedImage,
        CommandCode::SendCameraSettings,
        CommandCode::ReceiveCameraSettings,
        CommandCode::PingTest,
        CommandCode::SendRuntimeLog,
        CommandCode::TimeSync,
        CommandCode::HorizontalFlip,
        CommandCode::VerticalFlip,
        CommandCode::Ping,
        CommandCode::StatusReport,
    ];

    pub fn from_byte(code: u8) -> Option<Self> {
        let command = match code {
            b'1' => CommandCode::SendRecentImage,
            b'2' => CommandCode::SendImageIndex,
            b'3' => CommandCode::SendRequestedImage,
            b'4' => CommandCode::SendCameraSettings,
            b'5' => CommandCode::ReceiveCameraSettings,
            b'6' => CommandCode::PingTest,
            b'7' => CommandCode::SendRuntimeLog,
            b'8' => CommandCode::TimeSync,
            b'9' => CommandCode::HorizontalFlip,
            b'0' => CommandCode::VerticalFlip,
            b'~' => CommandCode::Ping,
            b'-' => CommandCode::StatusReport,
            _ => return None,
        };
        Some(command)
    }

    pub fn as_byte(self) -> u8 {
        match self {
            CommandCode::SendRecentImage => b'1',
            CommandCode::SendImageIndex => b'2',
            CommandCode::SendRequestedImage => b'3',
            CommandCode::SendCameraSettings => b'4',
            CommandCode::ReceiveCameraSettings => b'5',
            CommandCode::PingTest => b'6',
            CommandCode::SendRuntimeLog => b'7',
            CommandCode::TimeSync => b'8',
            CommandCode::HorizontalFlip => b'9',
            CommandCode::VerticalFlip => b'0',
            CommandCode::Ping => b'~',
            CommandCode::StatusReport => b'-',
        }
    }

    /// Acknowledgment written before the handler runs, if any
    pub fn acknowledgment(self) -> Option<&'static [u8]> {
        match self {
            CommandCode::Ping | CommandCode::StatusReport => None,
            _ => Some(ACK),
        }
    }

    /// The complete frame the ground station sends for this command
    pub fn frame(self) -> String {
        format!("{}{}{}", COMMAND_PREFIX, self.as_byte() as char, FRAME_TERMINATOR as char)
    }
}

/// What an assembled frame asks the payload to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    /// Nothing arrived
    Empty,
    /// A payload command
    Command(CommandCode),
    /// Anything else: relayed verbatim to the secondary radio
    Relay(Bytes),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_round_trip() {
        for code in CommandCode::ALL {
            assert_eq!(CommandCode::from_byte(code.as_byte()), Some(code));
        }
    }

    #[test]
    fn test_unknown_codes() {
        assert_eq!(CommandCode::from_byte(b'A'), None);
        assert_eq!(CommandCode::from_byte(b'!'), None);
        assert_eq!(CommandCode::from_byte(b';'), None);
    }

    #[test]
    fn test_frame_text() {
        assert_eq!(CommandCode::SendRecentImage.frame(), "IMAGE;1!");
        assert_eq!(CommandCode::StatusReport.frame(), "IMAGE;-!");
        assert_eq!(CommandCode::Ping.frame(), "IMAGE;~!");
    }

    #[test]
    fn test_acknowledgments() {
        assert_eq!(CommandCode::SendRecentImage.acknowledgment(), Some(ACK));
        assert_eq!(CommandCode::VerticalFlip.acknowledgment(), Some(ACK));
        assert_eq!(CommandCode::Ping.acknowledgment(), None);
        assert_eq!(CommandCode::StatusReport.acknowledgment(), None);
    }
}
