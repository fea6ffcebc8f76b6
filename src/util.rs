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
*/
use crate::{DiskImageError, ASCII_EOF};

/// Allocate an empty buffer with room for `len` bytes, reporting allocation failure as a
/// [DiskImageError::MemoryError] instead of aborting.
pub fn alloc_buffer(len: usize) -> Result<Vec<u8>, DiskImageError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| DiskImageError::MemoryError(len))?;
    Ok(buf)
}

/// Return `len` bytes of `data` starting at `offset`, or a format error naming `what` if the range
/// runs past the end of the buffer.
pub fn slice_at<'a>(data: &'a [u8], offset: usize, len: usize, what: &str) -> Result<&'a [u8], DiskImageError> {
    offset
        .checked_add(len)
        .and_then(|end| data.get(offset..end))
        .ok_or_else(|| {
            DiskImageError::FormatError(format!(
                "{} at {:#X}+{:#X} runs past end of image ({:#X} bytes)",
                what,
                offset,
                len,
                data.len()
            ))
        })
}

/// Read an ASCII string from the start of `source`, stopping at an EOF marker, a non-ASCII byte,
/// the end of the slice or `max_len` characters.
///
/// Returns the string (None if empty), the number of bytes consumed not including the
/// terminator, and the terminating byte (0 if the string ran to the end or to `max_len`).
pub fn read_ascii(source: &[u8], max_len: Option<usize>) -> (Option<String>, usize, u8) {
    let mut string = String::new();
    let mut terminating_byte = 0;
    let limit = max_len.unwrap_or(usize::MAX);

    for &b in source.iter().take(limit) {
        if b == ASCII_EOF || !b.is_ascii() {
            terminating_byte = b;
            break;
        }
        string.push(b as char);
    }

    let consumed = string.len();
    if string.is_empty() {
        (None, consumed, terminating_byte)
    }
    else {
        (Some(string), consumed, terminating_byte)
    }
}

/// Decode a fixed-width, NUL padded text field.
pub fn fixed_str(field: &[u8]) -> Option<String> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    let text = String::from_utf8_lossy(&field[..end]).trim_end().to_string();
    (!text.is_empty()).then_some(text)
}

/// Encode `text` into a fixed-width, NUL padded field, truncating if necessary.
pub fn to_fixed_str<const N: usize>(text: Option<&str>) -> [u8; N] {
    let mut field = [0u8; N];
    if let Some(text) = text {
        for (dst, src) in field.iter_mut().zip(text.bytes().filter(|b| b.is_ascii())) {
            *dst = src;
        }
    }
    field
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_stops_at_eof_marker() {
        let (text, consumed, term) = read_ascii(b"IMD 1.18: comment\x1Arest", None);
        assert_eq!(text.as_deref(), Some("IMD 1.18: comment"));
        assert_eq!(consumed, 17);
        assert_eq!(term, ASCII_EOF);
    }

    #[test]
    fn ascii_respects_max_len() {
        let (text, consumed, term) = read_ascii(b"abcdef", Some(3));
        assert_eq!(text.as_deref(), Some("abc"));
        assert_eq!(consumed, 3);
        assert_eq!(term, 0);
    }

    #[test]
    fn slice_past_end_is_format_error() {
        let data = [0u8; 8];
        assert!(slice_at(&data, 4, 4, "test").is_ok());
        assert!(matches!(slice_at(&data, 5, 4, "test"), Err(DiskImageError::FormatError(_))));
        assert!(slice_at(&data, usize::MAX, 2, "test").is_err());
    }

    #[test]
    fn fixed_strings() {
        assert_eq!(fixed_str(b"DISK\0\0\0\0"), Some("DISK".to_string()));
        assert_eq!(fixed_str(&[0u8; 4]), None);
        assert_eq!(&to_fixed_str::<6>(Some("ABCDEFGH")), b"ABCDEF");
    }
}
