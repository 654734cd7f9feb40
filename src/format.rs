//! Base-unit to display-unit conversion, used only at the HTTP boundary

/// Shannons per CKB
pub const CKB_DECIMALS: u8 = 8;

/// Satoshis per BTC
pub const BTC_DECIMALS: u8 = 8;

/// Render `amount` base units as a decimal string with `decimals` places,
/// trailing zeros trimmed. Exact for every u128.
pub fn format_units(amount: u128, decimals: u8) -> String {
    if decimals == 0 {
        return amount.to_string();
    }

    let digits = amount.to_string();
    let decimals = decimals as usize;
    let (whole, fraction) = if digits.len() > decimals {
        let split = digits.len() - decimals;
        (digits[..split].to_string(), digits[split..].to_string())
    } else {
        ("0".to_string(), format!("{:0>width$}", digits, width = decimals))
    };

    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        whole
    } else {
        format!("{}.{}", whole, fraction)
    }
}

pub fn shannons_to_ckb(shannons: u64) -> String {
    format_units(shannons as u128, CKB_DECIMALS)
}

pub fn sats_to_btc(sats: u64) -> String {
    format_units(sats as u128, BTC_DECIMALS)
}

/// Signed variant for balance deltas
pub fn signed_sats_to_btc(sats: i64) -> String {
    let formatted = sats_to_btc(sats.unsigned_abs());
    if sats < 0 {
        format!("-{}", formatted)
    } else {
        formatted
    }
}
