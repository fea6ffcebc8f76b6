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

    src/containers/mod.rs

    Outer wrappers around a disk image file. Only gzip is handled; the image
    inside is sniffed like any other buffer once unwrapped.
*/
use std::borrow::Cow;

use crate::DiskImageError;

pub(crate) mod gzip;

/// Return the disk image held in `data`, decompressing it first if it is wrapped in a supported
/// container. Unwrapped buffers are returned as-is.
pub(crate) fn unwrap_image(data: &[u8]) -> Result<Cow<'_, [u8]>, DiskImageError> {
    if gzip::detect(data) {
        log::debug!("unwrap_image(): gzip container detected");
        return gzip::extract(data).map(Cow::Owned);
    }
    Ok(Cow::Borrowed(data))
}
