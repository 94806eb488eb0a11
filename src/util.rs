use crate::error::VmError;

/// Parse a human-readable size string into bytes.
///
/// Accepts formats like `"20G"`, `"512M"`, `"100K"`, `"1073741824"`.
/// Uses binary units (1G = 1024³ = 1,073,741,824 bytes).
pub fn parse_size(s: &str) -> Result<u64, VmError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(VmError::Validation {
            message: "size cannot be empty".into(),
        });
    }

    let (num_str, suffix) = match s.find(|c: char| c.is_ascii_alphabetic()) {
        Some(i) => (s[..i].trim(), s[i..].to_ascii_uppercase()),
        None => (s, String::new()),
    };

    let num: u64 = num_str.parse().map_err(|_| VmError::Validation {
        message: format!("invalid size number: '{num_str}'"),
    })?;

    let multiplier: u64 = match suffix.as_str() {
        "" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
        "T" | "TB" | "TIB" => 1024 * 1024 * 1024 * 1024,
        _ => {
            return Err(VmError::Validation {
                message: format!("unknown size suffix: '{suffix}' (use G, M, K, or T)"),
            });
        }
    };

    num.checked_mul(multiplier)
        .ok_or_else(|| VmError::Validation {
            message: format!("size overflows: '{s}'"),
        })
}

/// Parse a VM memory size into KiB. A bare number is taken as MiB.
pub fn parse_memory_kib(s: &str) -> Result<u64, VmError> {
    let s = s.trim();
    let bytes = if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
        parse_size(&format!("{s}M"))?
    } else {
        parse_size(s)?
    };
    if bytes < 1024 {
        return Err(VmError::Validation {
            message: format!("memory must be at least 1K (got '{s}')"),
        });
    }
    Ok(bytes / 1024)
}
