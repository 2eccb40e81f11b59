//! XOR header cipher used by protected video links.
//!
//! Only the first [`HEADER_WINDOW`] bytes of a file are scrambled: byte `i`
//! is XORed with the `i`-th key character, or with `i` itself once the key
//! runs out. The transform is its own inverse.

use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use crate::errors::{AppError, Result};

pub const HEADER_WINDOW: usize = 28;

/// Key characters by code point. A character above `0xFF` has no byte
/// value and makes the key unusable.
pub fn key_bytes(key: &str) -> Result<Vec<u8>> {
    key.chars()
        .map(|c| {
            u8::try_from(u32::from(c))
                .map_err(|_| AppError::Decryption(format!("key character {:?} is out of byte range", c)))
        })
        .collect()
}

/// Applies the header transform in place.
pub fn apply_in_place(buffer: &mut [u8], key: &[u8]) {
    let window = buffer.len().min(HEADER_WINDOW);

    for (index, byte) in buffer[..window].iter_mut().enumerate() {
        let mask = key.get(index).copied().unwrap_or(index as u8);
        *byte ^= mask;
    }
}

#[cfg(test)]
pub fn apply(buffer: &[u8], key: &str) -> Vec<u8> {
    let mut out = buffer.to_vec();
    apply_in_place(&mut out, key.as_bytes());
    out
}

/// Writes `dest` as `source` with its header window transformed, streaming
/// the remainder verbatim. `source` is left untouched; the caller decides
/// what to do with it.
pub async fn decrypt_file(source: &Path, dest: &Path, key: &str) -> Result<u64> {
    let key = key_bytes(key)?;
    let mut input = tokio::fs::File::open(source).await?;

    let mut header = Vec::with_capacity(HEADER_WINDOW);
    (&mut input)
        .take(HEADER_WINDOW as u64)
        .read_to_end(&mut header)
        .await?;

    if header.is_empty() {
        return Err(AppError::Decryption(format!("{:?} is empty", source)));
    }

    apply_in_place(&mut header, &key);

    let mut output = tokio::fs::File::create(dest).await?;
    output.write_all(&header).await?;
    let copied = tokio::io::copy(&mut input, &mut output).await?;
    output.flush().await?;
    output.sync_all().await?;

    Ok(header.len() as u64 + copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn short_buffers_are_fully_transformed() {
        let input: Vec<u8> = (0u8..20).map(|b| b.wrapping_mul(7).wrapping_add(1)).collect();
        let out = apply(&input, "12345");
        for (i, (a, b)) in input.iter().zip(out.iter()).enumerate() {
            assert_ne!(a, b, "byte {} should change", i);
        }
    }

    #[test]
    fn bytes_past_the_window_pass_through() {
        let input = vec![0xAAu8; 64];
        let out = apply(&input, "key");
        assert_eq!(&out[HEADER_WINDOW..], &input[HEADER_WINDOW..]);
        assert_ne!(&out[..HEADER_WINDOW], &input[..HEADER_WINDOW]);
    }

    #[test]
    fn known_vector() {
        let input: Vec<u8> = (0x41u8..0x41 + 10).collect();
        let out = apply(&input, "12345");
        assert_eq!(out[0], 0x41 ^ b'1');
        assert_eq!(out[4], 0x45 ^ b'5');
        assert_eq!(out[5], 0x46 ^ 5);
        assert_eq!(out[9], 0x4A ^ 9);
    }

    #[test]
    fn self_inverse() {
        let input: Vec<u8> = (0u8..28).collect();
        for key in ["", "1", "12345", "a-much-longer-key-than-the-window-itself"] {
            assert_eq!(apply(&apply(&input, key), key), input);
        }
    }

    #[test]
    fn empty_key_xors_by_index() {
        let input = vec![0u8; 30];
        let out = apply(&input, "");
        let expected: Vec<u8> = (0u8..28).chain([0, 0]).collect();
        assert_eq!(out, expected);
    }

    #[tokio::test]
    async fn decrypts_file_header_and_copies_body() {
        let dir = TempDir::new().unwrap();
        let plain: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let source = dir.path().join("in_temp.mkv");
        let dest = dir.path().join("in.mkv");
        tokio::fs::write(&source, apply(&plain, "98765")).await.unwrap();

        let written = decrypt_file(&source, &dest, "98765").await.unwrap();

        assert_eq!(written, plain.len() as u64);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), plain);
        assert!(source.exists());
    }

    #[tokio::test]
    async fn empty_source_is_an_error() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("empty");
        tokio::fs::write(&source, b"").await.unwrap();
        let err = decrypt_file(&source, &dir.path().join("out"), "k").await.unwrap_err();
        assert!(matches!(err, AppError::Decryption(_)));
    }

    #[test]
    fn latin1_keys_map_to_single_bytes() {
        assert_eq!(key_bytes("1é").unwrap(), vec![b'1', 0xE9]);
        assert!(matches!(key_bytes("12€"), Err(AppError::Decryption(_))));
    }

    #[tokio::test]
    async fn out_of_range_key_leaves_no_output() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("in_temp.mkv");
        let dest = dir.path().join("in.mkv");
        tokio::fs::write(&source, b"0123456789").await.unwrap();

        let err = decrypt_file(&source, &dest, "k€y").await.unwrap_err();

        assert!(matches!(err, AppError::Decryption(_)));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn missing_source_is_an_io_error() {
        let dir = TempDir::new().unwrap();
        let err = decrypt_file(&dir.path().join("nope"), &dir.path().join("out"), "k")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Io(_)));
    }
}
