//! Message boundary detection.
//!
//! Startup packets carry a 4-byte big-endian length that counts itself.
//! Every other message starts with a 1-byte tag followed by a 4-byte
//! length that counts everything except the tag.

use super::Error;

/// Smallest startup packet: length and protocol code.
pub const MIN_STARTUP_PACKET_LENGTH: usize = 8;
/// Largest startup packet Postgres accepts.
pub const MAX_STARTUP_PACKET_LENGTH: usize = 10_000;
/// Tag and length.
pub const HEADER_SIZE: usize = 5;

/// Which framing the next message uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Connection hasn't been routed yet.
    Startup,
    /// Tagged messages.
    Steady,
}

/// Result of scanning a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    /// A complete message of this many bytes starts at the offset.
    Complete(usize),
    /// More bytes are needed. Carries the total message size once the
    /// header is available, so the caller can size its buffer.
    Partial(Option<usize>),
}

/// Finds message boundaries. Holds no state besides its limits.
#[derive(Debug, Clone, Copy)]
pub struct FrameScanner {
    max_message_size: usize,
}

impl Default for FrameScanner {
    fn default() -> Self {
        Self::new(1 << 30)
    }
}

impl FrameScanner {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size: max_message_size.max(HEADER_SIZE),
        }
    }

    /// Scan the message starting at `offset`.
    pub fn scan(&self, buf: &[u8], offset: usize, phase: Phase) -> Result<Frame, Error> {
        let buf = buf.get(offset..).unwrap_or_default();

        let total = match phase {
            Phase::Startup => {
                let Some(len) = read_length(buf, 0) else {
                    return Ok(Frame::Partial(None));
                };

                if !(MIN_STARTUP_PACKET_LENGTH as i64..=MAX_STARTUP_PACKET_LENGTH as i64)
                    .contains(&len)
                {
                    return Err(Error::InvalidStartupLength(len));
                }

                len as usize
            }

            Phase::Steady => {
                let Some(len) = read_length(buf, 1) else {
                    return Ok(Frame::Partial(None));
                };

                if len < 4 {
                    return Err(Error::InvalidLength(len));
                }

                let total = len as usize + 1;
                if total > self.max_message_size {
                    return Err(Error::MessageTooLarge(total));
                }

                total
            }
        };

        if buf.len() >= total {
            Ok(Frame::Complete(total))
        } else {
            Ok(Frame::Partial(Some(total)))
        }
    }

    /// Total size of the message at `offset`, if its header is buffered.
    pub fn message_size(&self, buf: &[u8], offset: usize, phase: Phase) -> Option<usize> {
        match self.scan(buf, offset, phase) {
            Ok(Frame::Complete(len)) | Ok(Frame::Partial(Some(len))) => Some(len),
            _ => None,
        }
    }
}

fn read_length(buf: &[u8], at: usize) -> Option<i64> {
    let bytes: [u8; 4] = buf.get(at..at + 4)?.try_into().ok()?;
    Some(i32::from_be_bytes(bytes) as i64)
}

#[cfg(test)]
mod test {
    use super::*;

    fn query(text: &str) -> Vec<u8> {
        let mut msg = vec![b'Q'];
        msg.extend_from_slice(&((text.len() + 5) as i32).to_be_bytes());
        msg.extend_from_slice(text.as_bytes());
        msg.push(0);
        msg
    }

    #[test]
    fn test_steady_complete() {
        let scanner = FrameScanner::default();
        for text in ["", "SELECT 1", "SELECT * FROM very_long_table_name"] {
            let msg = query(text);
            let declared = i32::from_be_bytes([msg[1], msg[2], msg[3], msg[4]]) as usize;
            assert_eq!(
                scanner.scan(&msg, 0, Phase::Steady).unwrap(),
                Frame::Complete(1 + 4 + (declared - 4))
            );
        }
    }

    #[test]
    fn test_steady_short_buffer() {
        let scanner = FrameScanner::default();
        let msg = query("SELECT 1");

        for cut in 0..msg.len() {
            let frame = scanner.scan(&msg[..cut], 0, Phase::Steady).unwrap();
            if cut < HEADER_SIZE {
                assert_eq!(frame, Frame::Partial(None));
            } else {
                assert_eq!(frame, Frame::Partial(Some(msg.len())));
            }
        }
    }

    #[test]
    fn test_offset() {
        let scanner = FrameScanner::default();
        let mut buf = query("SELECT 1");
        let first = buf.len();
        buf.extend(query("SELECT 2"));
        buf.extend(b"Q\0\0");

        assert_eq!(
            scanner.scan(&buf, first, Phase::Steady).unwrap(),
            Frame::Complete(first)
        );
        assert_eq!(
            scanner.scan(&buf, first * 2, Phase::Steady).unwrap(),
            Frame::Partial(None)
        );
        assert_eq!(
            scanner.scan(&buf, buf.len() + 10, Phase::Steady).unwrap(),
            Frame::Partial(None)
        );
    }

    #[test]
    fn test_bad_lengths() {
        let scanner = FrameScanner::new(1024);
        assert!(matches!(
            scanner.scan(b"Q\0\0\0\x03", 0, Phase::Steady),
            Err(Error::InvalidLength(3))
        ));
        assert!(matches!(
            scanner.scan(b"Q\xff\xff\xff\xff", 0, Phase::Steady),
            Err(Error::InvalidLength(-1))
        ));
        assert!(matches!(
            scanner.scan(b"Q\0\0\x10\0", 0, Phase::Steady),
            Err(Error::MessageTooLarge(4097))
        ));
    }

    #[test]
    fn test_startup() {
        let scanner = FrameScanner::default();
        let ssl = [0, 0, 0, 8, 0x04, 0xd2, 0x16, 0x2f];
        assert_eq!(
            scanner.scan(&ssl, 0, Phase::Startup).unwrap(),
            Frame::Complete(8)
        );
        assert_eq!(
            scanner.scan(&ssl[..6], 0, Phase::Startup).unwrap(),
            Frame::Partial(Some(8))
        );
        assert_eq!(
            scanner.scan(&ssl[..3], 0, Phase::Startup).unwrap(),
            Frame::Partial(None)
        );
        assert!(scanner.scan(&[0, 0, 0, 4], 0, Phase::Startup).is_err());
        assert!(scanner
            .scan(&10_001_i32.to_be_bytes(), 0, Phase::Startup)
            .is_err());
        assert_eq!(
            scanner.message_size(&10_000_i32.to_be_bytes(), 0, Phase::Startup),
            Some(10_000)
        );
    }
}
