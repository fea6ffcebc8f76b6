/*
    fluxvault

    Copyright 2024 The fluxvault Authors

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    src/containers/gzip.rs

    Gzip wrapped images (.atr.gz, .adz and the like).
*/
use std::io::Read;

use flate2::read::GzDecoder;

use crate::DiskImageError;

// Only deflate gzips are supported.
const GZIP_SIGNATURE: &[u8; 3] = b"\x1F\x8B\x08";
const MAX_FILE_SIZE: u64 = 100_000_000;

pub(crate) fn detect(data: &[u8]) -> bool {
    data.starts_with(GZIP_SIGNATURE)
}

/// Decompress a gzip stream held in memory.
pub(crate) fn extract(data: &[u8]) -> Result<Vec<u8>, DiskImageError> {
    let mut decoder = GzDecoder::new(data);
    if let Some(name) = decoder.header().and_then(|h| h.filename()) {
        log::debug!("Gzip::extract(): member name {}", String::from_utf8_lossy(name));
    }

    let mut decompressed = Vec::new();
    // Read one byte past the limit so oversized members can be told apart.
    decoder
        .by_ref()
        .take(MAX_FILE_SIZE + 1)
        .read_to_end(&mut decompressed)
        .map_err(|e| DiskImageError::FormatError(format!("gzip: {}", e)))?;

    if decompressed.len() as u64 > MAX_FILE_SIZE {
        return Err(DiskImageError::MemoryError(decompressed.len()));
    }
    Ok(decompressed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{write::GzEncoder, Compression};
    use std::io::Write;

    #[test]
    fn extract_round_trip() {
        let payload: Vec<u8> = (0..4096).map(|i| (i % 251) as u8).collect();
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&payload).unwrap();
        let gz = enc.finish().unwrap();

        assert!(detect(&gz));
        assert!(!detect(&payload));
        assert_eq!(extract(&gz).unwrap(), payload);
    }

    #[test]
    fn truncated_stream_is_format_error() {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&[0x55u8; 2048]).unwrap();
        let gz = enc.finish().unwrap();
        assert!(matches!(extract(&gz[..gz.len() / 2]), Err(DiskImageError::FormatError(_))));
    }
}
