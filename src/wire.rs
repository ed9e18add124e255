//! Flat little-endian encoding of protocol payloads.
//!
//! Payloads are error counts, labels, role announcements and flat `f64`
//! arrays. Lists of payloads (one per rank) are framed with a `u64` count
//! followed by `u64` length prefixes.

use crate::error::{CouplerError, Result};

/// A value that can travel as a single message payload.
pub trait WireValue: Sized {
    fn encode(&self) -> Vec<u8>;
    fn decode(bytes: &[u8]) -> Result<Self>;
}

impl WireValue for u32 {
    fn encode(&self) -> Vec<u8> {
        self.to_le_bytes().to_vec()
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; 4] = bytes
            .try_into()
            .map_err(|_| CouplerError::Wire(format!("expected 4 bytes for u32, got {}", bytes.len())))?;
        Ok(u32::from_le_bytes(raw))
    }
}

impl WireValue for f64 {
    fn encode(&self) -> Vec<u8> {
        self.to_le_bytes().to_vec()
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; 8] = bytes
            .try_into()
            .map_err(|_| CouplerError::Wire(format!("expected 8 bytes for f64, got {}", bytes.len())))?;
        Ok(f64::from_le_bytes(raw))
    }
}

impl WireValue for String {
    fn encode(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        String::from_utf8(bytes.to_vec()).map_err(|e| CouplerError::Wire(e.to_string()))
    }
}

impl WireValue for Vec<f64> {
    fn encode(&self) -> Vec<u8> {
        encode_f64s(self)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let mut values = vec![0.0; f64_count(bytes)?];
        decode_f64s_into(bytes, &mut values)?;
        Ok(values)
    }
}

pub fn encode_f64s(values: &[f64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 8);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Number of `f64` values in an encoded array.
pub fn f64_count(bytes: &[u8]) -> Result<usize> {
    if bytes.len() % 8 != 0 {
        return Err(CouplerError::Wire(format!(
            "{} bytes is not a whole number of f64 values",
            bytes.len()
        )));
    }
    Ok(bytes.len() / 8)
}

/// Decode an `f64` array into `out`, which must have exactly the right length.
pub fn decode_f64s_into(bytes: &[u8], out: &mut [f64]) -> Result<()> {
    let count = f64_count(bytes)?;
    if count != out.len() {
        return Err(CouplerError::FieldSizeMismatch {
            expected: out.len(),
            received: count,
        });
    }
    for (slot, chunk) in out.iter_mut().zip(bytes.chunks_exact(8)) {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(chunk);
        *slot = f64::from_le_bytes(raw);
    }
    Ok(())
}

/// Encode a list of global ranks.
pub fn encode_ranks(ranks: &[usize]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ranks.len() * 8);
    for &rank in ranks {
        out.extend_from_slice(&(rank as u64).to_le_bytes());
    }
    out
}

pub fn decode_ranks(bytes: &[u8]) -> Result<Vec<usize>> {
    let mut cursor = bytes;
    let mut ranks = Vec::with_capacity(bytes.len() / 8);
    while !cursor.is_empty() {
        let rank = take_u64(&mut cursor)?;
        ranks.push(
            usize::try_from(rank).map_err(|_| CouplerError::Wire(format!("rank {rank} overflows usize")))?,
        );
    }
    Ok(ranks)
}

/// Concatenate per-rank payloads into one framed message.
pub fn encode_frames(frames: &[Vec<u8>]) -> Vec<u8> {
    let total: usize = frames.iter().map(|f| f.len() + 8).sum();
    let mut out = Vec::with_capacity(total + 8);
    out.extend_from_slice(&(frames.len() as u64).to_le_bytes());
    for frame in frames {
        out.extend_from_slice(&(frame.len() as u64).to_le_bytes());
        out.extend_from_slice(frame);
    }
    out
}

pub fn decode_frames(bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut cursor = bytes;
    let count = take_u64(&mut cursor)?;
    let mut frames = Vec::new();
    for _ in 0..count {
        let len = usize::try_from(take_u64(&mut cursor)?)
            .map_err(|_| CouplerError::Wire("frame length overflows usize".into()))?;
        if cursor.len() < len {
            return Err(CouplerError::Wire(format!(
                "frame of {len} bytes truncated to {}",
                cursor.len()
            )));
        }
        let (frame, rest) = cursor.split_at(len);
        frames.push(frame.to_vec());
        cursor = rest;
    }
    if !cursor.is_empty() {
        return Err(CouplerError::Wire(format!("{} trailing bytes after frames", cursor.len())));
    }
    Ok(frames)
}

fn take_u64(cursor: &mut &[u8]) -> Result<u64> {
    if cursor.len() < 8 {
        return Err(CouplerError::Wire("truncated length prefix".into()));
    }
    let (head, rest) = cursor.split_at(8);
    let mut raw = [0u8; 8];
    raw.copy_from_slice(head);
    *cursor = rest;
    Ok(u64::from_le_bytes(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_preserve_empty_payloads() {
        let frames = vec![b"solver".to_vec(), Vec::new(), b"tracker".to_vec()];
        let decoded = decode_frames(&encode_frames(&frames)).unwrap();
        assert_eq!(decoded, frames);
    }

    #[test]
    fn truncated_frames_are_rejected() {
        let mut bytes = encode_frames(&[b"abcdef".to_vec()]);
        bytes.truncate(bytes.len() - 2);
        assert!(matches!(decode_frames(&bytes), Err(CouplerError::Wire(_))));
    }

    #[test]
    fn f64_decode_checks_destination_length() {
        let bytes = encode_f64s(&[1.0, 2.0, 3.0]);
        let mut out = [0.0; 2];
        assert!(matches!(
            decode_f64s_into(&bytes, &mut out),
            Err(CouplerError::FieldSizeMismatch { expected: 2, received: 3 })
        ));
    }

    #[test]
    fn count_rejects_wrong_width() {
        assert!(u32::decode(&[1, 0, 0]).is_err());
        assert_eq!(u32::decode(&7u32.encode()).unwrap(), 7);
    }
}
