// =============================================================================
// Correlation groups — cap concurrent exposure to co-moving assets
// =============================================================================
//
// Groups are fixed sets. At most two positions in the same group; if a BTC
// position is open the whole book is assumed BTC-correlated and the cap
// drops to one.
// =============================================================================

/// Fixed correlation groups, `<COIN>` form.
const GROUPS: &[(&str, &[&str])] = &[
    ("btc", &["BTC", "ETH", "LTC", "BCH"]),
    ("meme", &["DOGE", "SHIB", "PEPE", "WIF", "BONK"]),
    ("defi", &["UNI", "AAVE", "CRV", "LDO", "MKR"]),
    ("layer2", &["ARB", "OP", "MATIC", "STRK"]),
    ("ai", &["FET", "RNDR", "TAO", "WLD"]),
];

/// The group a symbol belongs to, if any.
pub fn group_of(symbol: &str) -> Option<&'static str> {
    let coin = crate::types::coin_of(symbol);
    GROUPS
        .iter()
        .find(|(_, members)| members.contains(&coin))
        .map(|(name, _)| *name)
}

/// Check whether opening `candidate` is allowed next to `open_symbols`.
/// Returns the rejection reason when the group cap is exceeded.
pub fn check(open_symbols: &[String], candidate: &str) -> Result<(), String> {
    let Some(group) = group_of(candidate) else {
        return Ok(());
    };

    let btc_open = open_symbols
        .iter()
        .any(|s| crate::types::coin_of(s) == "BTC");
    let cap: usize = if btc_open { 1 } else { 2 };

    let in_group = open_symbols
        .iter()
        .filter(|s| group_of(s) == Some(group))
        .count();

    if in_group + 1 > cap {
        return Err(format!(
            "correlation cap: {in_group} open in group '{group}' (cap {cap})"
        ));
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn open(symbols: &[&str]) -> Vec<String> {
        symbols.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn group_membership() {
        assert_eq!(group_of("BTC-PERP"), Some("btc"));
        assert_eq!(group_of("PEPE-PERP"), Some("meme"));
        assert_eq!(group_of("ARB-PERP"), Some("layer2"));
        assert_eq!(group_of("XRP-PERP"), None);
    }

    #[test]
    fn ungrouped_symbol_always_passes() {
        assert!(check(&open(&["BTC-PERP", "ETH-PERP"]), "XRP-PERP").is_ok());
    }

    #[test]
    fn second_in_group_allowed_third_rejected() {
        assert!(check(&open(&["DOGE-PERP"]), "PEPE-PERP").is_ok());
        assert!(check(&open(&["DOGE-PERP", "PEPE-PERP"]), "WIF-PERP").is_err());
    }

    #[test]
    fn btc_open_drops_cap_to_one() {
        // ETH is in the BTC group; with BTC open it is the second, over cap 1.
        assert!(check(&open(&["BTC-PERP"]), "ETH-PERP").is_err());
        // A meme position next to BTC is also capped at one.
        assert!(check(&open(&["BTC-PERP", "DOGE-PERP"]), "PEPE-PERP").is_err());
        // First meme position next to BTC is fine.
        assert!(check(&open(&["BTC-PERP"]), "DOGE-PERP").is_ok());
    }

    #[test]
    fn empty_book_allows_anything() {
        assert!(check(&[], "BTC-PERP").is_ok());
        assert!(check(&[], "PEPE-PERP").is_ok());
    }
}
