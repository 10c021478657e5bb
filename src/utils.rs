//! Identifier helpers

use bech32::Bech32m;
use uuid7::uuid7;

// construct a unique, time ordered id then encode using bech32m with the given prefix
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// True if `id` is a bech32m string whose prefix is `hrp`.
pub fn has_prefix(id: &str, hrp: &str) -> bool {
    match bech32::decode(id) {
        Ok((decoded, _)) => decoded.as_str() == hrp,
        Err(_) => false,
    }
}
