use std::{fs, path::Path};

use crate::error::Result;

/// Verdict of the delivery-size check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeCheck {
    /// Within the ceiling; exactly-at-limit counts.
    Ok(u64),
    /// Over the ceiling by at least one byte.
    TooLarge(u64),
}

/// Compare the artifact's on-disk size against the delivery ceiling.
/// Reads file metadata only, never content.
pub fn check(path: &Path, ceiling_bytes: u64) -> Result<SizeCheck> {
    let size = fs::metadata(path)?.len();
    if size <= ceiling_bytes {
        Ok(SizeCheck::Ok(size))
    } else {
        Ok(SizeCheck::TooLarge(size))
    }
}
