use anyhow::{anyhow, bail, Context, Result};
use peach_pow::BlockTrailer;

use crate::stratum::StratumJob;

/// Decode a fixed-size hex field, tolerating an optional `0x` prefix.
pub fn decode_hex_array<const N: usize>(input: &str, what: &str) -> Result<[u8; N]> {
    let trimmed = input.strip_prefix("0x").unwrap_or(input);
    let bytes = hex::decode(trimmed).with_context(|| format!("invalid hex in {what}"))?;
    let arr: [u8; N] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow!("{what} must be {N} bytes, got {}", bytes.len()))?;
    Ok(arr)
}

/// Parse a pool-supplied integer field. Pools disagree on the encoding:
/// `0x`-prefixed hex, plain decimal, and bare hex (`"1c"`) are all seen in
/// the wild. Digits-only strings are decimal; anything else is hex.
pub fn parse_u32_flex(input: &str, what: &str) -> Result<u32> {
    let s = input.trim();
    if s.is_empty() {
        bail!("empty {what}");
    }
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return u32::from_str_radix(hex, 16).with_context(|| format!("invalid hex {what}"));
    }
    if s.bytes().all(|b| b.is_ascii_digit()) {
        return s.parse().with_context(|| format!("invalid decimal {what}"));
    }
    u32::from_str_radix(s, 16).with_context(|| format!("invalid {what}"))
}

/// Build a solvable block trailer from a Stratum job. Pool jobs carry no
/// transactions, but the device orchestrator requires a nonzero tcount to
/// enter work, so trailers are stamped with tcount = 1.
pub fn trailer_from_job(job: &StratumJob) -> BlockTrailer {
    let mut bt = BlockTrailer::default();
    bt.set_phash(&job.phash);
    bt.set_bnum_bytes(&job.bnum);
    bt.set_mroot(&job.mroot);
    bt.set_difficulty(job.difficulty);
    bt.set_time0(job.time0);
    bt.set_tcount(1);
    bt
}

pub fn encode_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

pub fn unix_time() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

pub fn format_hashrate(hps: f64) -> String {
    if hps >= 1_000_000_000.0 {
        return format!("{:.3} GH/s", hps / 1_000_000_000.0);
    }
    if hps >= 1_000_000.0 {
        return format!("{:.3} MH/s", hps / 1_000_000.0);
    }
    if hps >= 1_000.0 {
        return format!("{:.3} KH/s", hps / 1_000.0);
    }
    format!("{hps:.3} H/s")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_arrays_round_trip() {
        let bytes: [u8; 4] = decode_hex_array("deadbeef", "test").expect("valid hex");
        assert_eq!(bytes, [0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(encode_hex(&bytes), "deadbeef");

        let with_prefix: [u8; 2] = decode_hex_array("0x1234", "test").expect("valid hex");
        assert_eq!(with_prefix, [0x12, 0x34]);

        assert!(decode_hex_array::<4>("dead", "test").is_err());
        assert!(decode_hex_array::<2>("zzzz", "test").is_err());
    }

    #[test]
    fn flexible_integers_cover_pool_dialects() {
        assert_eq!(parse_u32_flex("28", "diff").expect("decimal"), 28);
        assert_eq!(parse_u32_flex("0x1c", "diff").expect("prefixed hex"), 0x1c);
        assert_eq!(parse_u32_flex("1c", "diff").expect("bare hex"), 0x1c);
        assert_eq!(parse_u32_flex("0", "time0").expect("zero"), 0);
        assert!(parse_u32_flex("", "diff").is_err());
        assert!(parse_u32_flex("xyz", "diff").is_err());
    }

    #[test]
    fn format_hashrate_units() {
        assert_eq!(format_hashrate(5.0), "5.000 H/s");
        assert_eq!(format_hashrate(5_000.0), "5.000 KH/s");
        assert_eq!(format_hashrate(5_000_000.0), "5.000 MH/s");
        assert_eq!(format_hashrate(5_000_000_000.0), "5.000 GH/s");
    }
}
