//! Framing: raw payload followed by a single `0x00` sentinel. No escaping, so payloads
//! must not contain the sentinel themselves.

/// Sentinel that terminates every frame on the wire.
pub const DELIMITER: u8 = 0x00;

/// Append the sentinel. Does not inspect the payload; see [`encode_frame`].
pub fn append_delimiter(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 1);
    out.extend_from_slice(payload);
    out.push(DELIMITER);
    out
}

/// Build a wire frame, refusing payloads that would split into several frames on the
/// receiving side.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if let Some(pos) = payload.iter().position(|&b| b == DELIMITER) {
        return Err(FrameError::EmbeddedDelimiter(pos));
    }
    Ok(append_delimiter(payload))
}

/// Strip the trailing sentinel from a complete frame.
pub fn truncate_delimiter(framed: &[u8]) -> Result<&[u8], FrameError> {
    match framed.split_last() {
        None => Err(FrameError::Empty),
        Some((&DELIMITER, payload)) => Ok(payload),
        Some(_) => Err(FrameError::MissingDelimiter),
    }
}

/// Payload of a datagram. Datagrams delimit themselves, so a missing sentinel is
/// tolerated and the whole datagram is delivered.
pub fn datagram_payload(datagram: &[u8]) -> &[u8] {
    truncate_delimiter(datagram).unwrap_or(datagram)
}

/// Framing violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("frame does not end with the delimiter")]
    MissingDelimiter,
    #[error("payload contains the delimiter at offset {0}")]
    EmbeddedDelimiter(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_plain_payloads() {
        for p in [&b""[..], &b"a"[..], &b"hello server"[..], &[1u8, 2, 255, 7][..]] {
            let framed = encode_frame(p).unwrap();
            assert_eq!(framed.last(), Some(&DELIMITER));
            assert_eq!(framed.len(), p.len() + 1);
            assert_eq!(truncate_delimiter(&framed).unwrap(), p);
        }
    }

    #[test]
    fn truncate_guards_empty_input() {
        assert_eq!(truncate_delimiter(&[]), Err(FrameError::Empty));
    }

    #[test]
    fn truncate_rejects_missing_sentinel() {
        assert_eq!(truncate_delimiter(b"abc"), Err(FrameError::MissingDelimiter));
    }

    #[test]
    fn lone_sentinel_is_empty_payload() {
        assert_eq!(truncate_delimiter(&[0]).unwrap(), b"");
    }

    #[test]
    fn encode_rejects_embedded_sentinel() {
        assert_eq!(
            encode_frame(b"ab\0cd"),
            Err(FrameError::EmbeddedDelimiter(2))
        );
    }

    #[test]
    fn append_does_not_validate() {
        assert_eq!(append_delimiter(b"a\0"), vec![b'a', 0, 0]);
    }

    #[test]
    fn datagram_with_and_without_sentinel() {
        assert_eq!(datagram_payload(b"hello\0"), b"hello");
        assert_eq!(datagram_payload(b"hello"), b"hello");
        assert_eq!(datagram_payload(b""), b"");
    }
}
