//! Inputs are the byte strings handed to the target.
//!
//! The optimizer searches over real vectors ([`Sample`]); the target consumes
//! bytes ([`EncodedInput`]). [`encode`] is the only bridge between the two.

use std::{fs::File, io::Read, path::Path};

use serde::{Deserialize, Serialize};

use crate::Error;

/// A point in the search box, as produced by the optimizer.
///
/// Its length is `sample_size * dim`, every component lies inside the
/// optimizer's bounds.
pub type Sample = Vec<f64>;

/// The bytes fed to the target's stdin
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct EncodedInput {
    bytes: Vec<u8>,
}

/// Maps a [`Sample`] to the bytes the target reads.
///
/// Every component is truncated toward zero. Values outside `[0, 255]` can not
/// be produced by a bounded optimizer, the cast saturates them anyway.
#[must_use]
pub fn encode(sample: &[f64]) -> EncodedInput {
    EncodedInput {
        bytes: sample.iter().map(|x| *x as u8).collect(),
    }
}

impl EncodedInput {
    /// Creates a new input from raw bytes
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// The raw bytes
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// `true` for an input without bytes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decode-as-real: the [`Sample`] that encodes to exactly these bytes
    #[must_use]
    pub fn to_sample(&self) -> Sample {
        self.bytes.iter().map(|b| f64::from(*b)).collect()
    }

    /// The stringified form used as uniqueness key in the test suite
    #[must_use]
    pub fn key(&self) -> String {
        use core::fmt::Write;

        self.bytes
            .iter()
            .fold(String::with_capacity(self.bytes.len() * 2), |mut s, b| {
                let _ = write!(s, "{b:02x}");
                s
            })
    }

    /// Write this input to the file
    pub fn to_file<P>(&self, path: P) -> Result<(), Error>
    where
        P: AsRef<Path>,
    {
        std::fs::write(path, &self.bytes)?;
        Ok(())
    }

    /// Load the content of this input from a file
    pub fn from_file<P>(path: P) -> Result<Self, Error>
    where
        P: AsRef<Path>,
    {
        let mut file = File::open(path)?;
        let mut bytes: Vec<u8> = vec![];
        file.read_to_end(&mut bytes)?;
        Ok(EncodedInput::new(bytes))
    }
}

impl From<Vec<u8>> for EncodedInput {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&[u8]> for EncodedInput {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec())
    }
}

/// Interprets up to 8 bytes as a little-endian signed integer.
///
/// A 4 byte input maps to an `i32`, sign-extended.
#[must_use]
pub fn bytes_to_int(bytes: &[u8]) -> i64 {
    if bytes.is_empty() {
        return 0;
    }
    let len = bytes.len().min(8);
    let mut buf = [0_u8; 8];
    buf[..len].copy_from_slice(&bytes[..len]);
    if bytes[len - 1] & 0x80 != 0 {
        buf[len..].fill(0xff);
    }
    i64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::{bytes_to_int, encode, EncodedInput};

    #[test]
    fn test_encode_truncates() {
        let input = encode(&[0.0, 0.99, 127.5, 255.99, 12.01]);
        assert_eq!(input.bytes(), &[0, 0, 127, 255, 12]);
    }

    #[test]
    fn test_encode_len_and_range() {
        let samples: [&[f64]; 3] = [&[], &[128.0; 4], &[-3.0, 300.0, 64.2]];
        for sample in samples {
            let input = encode(sample);
            assert_eq!(input.len(), sample.len());
        }
        // saturating at the box edges
        assert_eq!(encode(&[-3.0, 300.0]).bytes(), &[0, 255]);
    }

    #[test]
    fn test_encode_idempotent() {
        let sample = [17.3, 200.999, 0.5, 88.0];
        let once = encode(&sample);
        let twice = encode(&once.to_sample());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_key() {
        assert_eq!(EncodedInput::new(vec![0x1a, 0, 0xff]).key(), "1a00ff");
        assert_ne!(encode(&[1.0, 2.0]).key(), encode(&[2.0, 1.0]).key());
    }

    #[test]
    fn test_bytes_to_int() {
        assert_eq!(bytes_to_int(&[0x1a, 0, 0, 0]), 26);
        assert_eq!(bytes_to_int(&[0xe9, 0x03, 0, 0]), 1001);
        assert_eq!(bytes_to_int(&[0xff, 0xff, 0xff, 0xff]), -1);
        assert_eq!(bytes_to_int(&[0, 0, 0, 0x80]), i64::from(i32::MIN));
        assert_eq!(bytes_to_int(&[]), 0);
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input");
        let input = EncodedInput::new(vec![1, 2, 3]);
        input.to_file(&path).unwrap();
        assert_eq!(EncodedInput::from_file(&path).unwrap(), input);
    }
}
