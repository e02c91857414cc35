//! Disk size parsing.

use crate::error::{AssemblyError, Result};

/// Parse a size in megabytes.
///
/// Accepts a bare number of megabytes, or a number suffixed with `M`
/// (megabytes) or `G` (gigabytes). An empty string is `0`.
pub fn parse_size_mb(input: &str) -> Result<u64> {
    if input.is_empty() {
        return Ok(0);
    }

    let invalid = |source| AssemblyError::InvalidSize {
        input: input.to_string(),
        source,
    };

    if let Some(gigabytes) = input.strip_suffix('G') {
        let value: u64 = gigabytes.parse().map_err(invalid)?;
        return value
            .checked_mul(1024)
            .ok_or_else(|| AssemblyError::SizeTooLarge {
                input: input.to_string(),
            });
    }

    let megabytes = input.strip_suffix('M').unwrap_or(input);
    megabytes.parse().map_err(invalid)
}
