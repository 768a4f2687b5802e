use tracing::debug;

use crate::models::NormalizedTransfer;

/// Lower-cased hex digits with the `0x` prefix and leading zeros removed, so
/// `0x00ABC` and `0xabc` compare equal. Zero normalizes to `"0"`.
pub fn normalize_address(address: &str) -> String {
    let trimmed = address.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed)
        .trim_start_matches('0');
    if digits.is_empty() {
        "0".to_string()
    } else {
        digits.to_ascii_lowercase()
    }
}

/// Keeps only transfers sent by the facilitator. Everything else is out of
/// scope for this run, not an error.
pub fn retain_facilitator_transfers(
    transfers: Vec<NormalizedTransfer>,
    facilitator_address: &str,
) -> Vec<NormalizedTransfer> {
    let facilitator = normalize_address(facilitator_address);
    let before = transfers.len();
    let kept: Vec<_> = transfers
        .into_iter()
        .filter(|t| normalize_address(&t.sender) == facilitator)
        .collect();
    debug!(kept = kept.len(), dropped = before - kept.len(), "filtered by facilitator");
    kept
}
