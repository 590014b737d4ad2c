//! LZ4 block compression for stored payload bytes

#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),
}

/// Compress with the uncompressed length prepended
pub fn compress(data: &[u8]) -> Vec<u8> {
    if data.is_empty() {
        return Vec::new();
    }
    lz4_flex::compress_prepend_size(data)
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CompressionError> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    lz4_flex::decompress_size_prepended(data)
        .map_err(|e| CompressionError::DecompressionFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repetitive_data_shrinks() {
        let data: Vec<u8> = vec![0x42; 10000];

        let compressed = compress(&data);
        assert!(compressed.len() < data.len() / 10);
        assert_eq!(decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn test_empty() {
        assert!(compress(&[]).is_empty());
        assert!(decompress(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_input() {
        // Shorter than the length prefix
        assert!(decompress(&[0x10, 0x00]).is_err());
    }
}
