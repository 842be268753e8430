//! パース関連のユーティリティ関数

use anyhow::Result;

/// アドレス文字列をu64にパース
///
/// バックトレースやモニタの出力に現れるアドレスは常に16進数なので、
/// 0xプレフィックスの有無にかかわらず16進数として解釈します。
///
/// # Examples
/// ```
/// use emuwrap_core::parse::parse_address;
///
/// assert_eq!(parse_address("0x0000baf2").unwrap(), 0xbaf2);
/// assert_eq!(parse_address("c0100000").unwrap(), 0xc010_0000);
/// ```
pub fn parse_address(s: &str) -> Result<u64> {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);

    u64::from_str_radix(digits, 16)
        .map_err(|e| anyhow::anyhow!("Invalid hexadecimal address '{}': {}", s, e))
}
