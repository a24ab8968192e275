//! Buffer helpers: fallible allocation and non-aliasing copies

use std::ops::Range;

use ks_core::{KeystoreError, KsResult};

/// True when the half-open ranges share at least one element.
pub fn ranges_overlap(a: &Range<usize>, b: &Range<usize>) -> bool {
    !a.is_empty() && !b.is_empty() && a.start < b.end && b.start < a.end
}

fn addr_range(bytes: &[u8]) -> Range<usize> {
    let start = bytes.as_ptr() as usize;
    start..start + bytes.len()
}

/// Copy `src` to the front of `dst`.
///
/// Fails with `Fault` when `dst` is too small or the two regions alias,
/// rather than producing a partial or corrupted copy.
pub fn copy_checked(dst: &mut [u8], src: &[u8]) -> KsResult<()> {
    if src.len() > dst.len() {
        return Err(KeystoreError::fault(format!(
            "destination holds {} bytes, source has {}",
            dst.len(),
            src.len()
        )));
    }
    if ranges_overlap(&addr_range(dst), &addr_range(src)) {
        return Err(KeystoreError::fault("source and destination overlap"));
    }
    dst[..src.len()].copy_from_slice(src);
    Ok(())
}

/// Zero-filled buffer of `len` bytes, or `OutOfMemory`.
pub fn alloc_zeroed(len: usize) -> KsResult<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| KeystoreError::OutOfMemory { requested: len })?;
    buf.resize(len, 0);
    Ok(buf)
}
