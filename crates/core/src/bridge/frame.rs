//! Length-prefixed result frames
//!
//! ```text
//! +----------------+------------------+
//! | u32 LE length  | payload          |
//! +----------------+------------------+
//! ```
//!
//! The length counts the whole frame, header included, so an empty payload
//! is a four-byte frame holding `4`.

use modhost_sdk::bridge::RESULT_HEADER_LEN;

pub const HEADER_LEN: usize = RESULT_HEADER_LEN;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("Frame of {0} bytes is shorter than its header")]
    Truncated(usize),

    #[error("Frame declares {declared} bytes but {actual} are available")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("Payload of {0} bytes does not fit a frame")]
    TooLarge(usize),
}

/// Wrap `payload` in a frame
pub fn encode(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let total = payload
        .len()
        .checked_add(HEADER_LEN)
        .and_then(|n| u32::try_from(n).ok())
        .ok_or(FrameError::TooLarge(payload.len()))?;

    let mut frame = Vec::with_capacity(total as usize);
    frame.extend_from_slice(&total.to_le_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Declared total length of the frame starting at `bytes`
pub fn frame_len(bytes: &[u8]) -> Result<usize, FrameError> {
    let header: [u8; HEADER_LEN] = bytes
        .get(..HEADER_LEN)
        .and_then(|h| h.try_into().ok())
        .ok_or(FrameError::Truncated(bytes.len()))?;

    let declared = u32::from_le_bytes(header) as usize;
    if declared < HEADER_LEN {
        return Err(FrameError::Truncated(declared));
    }
    Ok(declared)
}

/// Payload of the frame starting at `bytes`
///
/// Bytes past the declared length are ignored.
pub fn payload(bytes: &[u8]) -> Result<&[u8], FrameError> {
    let declared = frame_len(bytes)?;
    bytes
        .get(HEADER_LEN..declared)
        .ok_or(FrameError::LengthMismatch {
            declared,
            actual: bytes.len(),
        })
}

/// Read the length prefix of a foreign frame
///
/// # Safety
/// `frame` must point to at least [`HEADER_LEN`] readable bytes.
pub unsafe fn read_frame_len(frame: *const u8) -> u32 {
    u32::from_le(std::ptr::read_unaligned(frame as *const u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_includes_header() {
        let frame = encode(b"hello").unwrap();
        assert_eq!(frame.len(), 9);
        assert_eq!(&frame[..4], &9u32.to_le_bytes());
        assert_eq!(payload(&frame).unwrap(), b"hello");
    }

    #[test]
    fn test_empty_payload() {
        let frame = encode(&[]).unwrap();
        assert_eq!(frame, vec![4, 0, 0, 0]);
        assert_eq!(frame_len(&frame), Ok(4));
        assert!(payload(&frame).unwrap().is_empty());
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut frame = encode(&[1, 2, 3]).unwrap();
        frame.extend_from_slice(&[0xAA; 8]);
        assert_eq!(payload(&frame).unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn test_malformed_frames() {
        assert_eq!(frame_len(&[1, 0]), Err(FrameError::Truncated(2)));
        assert_eq!(frame_len(&[2, 0, 0, 0]), Err(FrameError::Truncated(2)));
        assert_eq!(
            payload(&[16, 0, 0, 0, 1, 2]),
            Err(FrameError::LengthMismatch {
                declared: 16,
                actual: 6
            })
        );
    }

    #[test]
    fn test_read_frame_len_unaligned() {
        let mut buffer = vec![0u8; 1];
        buffer.extend(encode(&[7; 12]).unwrap());
        let len = unsafe { read_frame_len(buffer.as_ptr().add(1)) };
        assert_eq!(len, 16);
    }
}
