//! Utility functions for PC/SC operations

/// Check whether an ATR starts with the given prefix
pub(crate) fn atr_has_prefix(atr: &[u8], prefix: &[u8]) -> bool {
    atr.starts_with(prefix)
}
