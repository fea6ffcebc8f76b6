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

    src/compression/rle.rs

    Pattern fill run-length expansion.
*/
use crate::{util::alloc_buffer, DiskImageError, MAXIMUM_SECTOR_SIZE};

/// Expand `count` repetitions of `pattern`.
pub fn expand(count: usize, pattern: &[u8]) -> Result<Vec<u8>, DiskImageError> {
    if pattern.is_empty() {
        return Err(DiskImageError::FormatError("run-length record with empty pattern".to_string()));
    }
    let len = count
        .checked_mul(pattern.len())
        .filter(|&len| len <= MAXIMUM_SECTOR_SIZE * 2)
        .ok_or_else(|| {
            DiskImageError::FormatError(format!("run of {} x {} bytes is implausibly long", count, pattern.len()))
        })?;

    let mut out = alloc_buffer(len)?;
    for _ in 0..count {
        out.extend_from_slice(pattern);
    }
    Ok(out)
}

/// Return the fill byte if every byte of `data` is the same.
pub fn uniform_fill(data: &[u8]) -> Option<u8> {
    let first = *data.first()?;
    data.iter().all(|&b| b == first).then_some(first)
}
