//! TLBマッピングの表示

use crate::parse::parse_address;
use std::fmt;
use tracing::debug;

/// ページのオフセット部分のマスク
const PAGE_MASK: u64 = 0xfff;

/// TLBのエントリ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlbEntry {
    /// 仮想アドレス
    pub virt: u64,
    /// 物理アドレス
    pub phys: u64,
    /// 属性フラグ（エミュレータの表示のまま）
    pub flags: String,
}

impl fmt::Display for TlbEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}: {:#010x} {}", self.virt, self.phys, self.flags)
    }
}

/// `info tlb` の出力をエントリの列に変換する
///
/// `:` を含まない行（区切りなど）は読み飛ばします。
/// `filter` を指定すると、そのアドレスを含むページのエントリだけを返します。
pub fn parse_tlb<S: AsRef<str>>(lines: &[S], filter: Option<u64>) -> Vec<TlbEntry> {
    let page = filter.map(|addr| addr & !PAGE_MASK);

    lines
        .iter()
        .map(AsRef::as_ref)
        .filter(|line| line.contains(':'))
        .filter_map(|line| {
            let entry = parse_row(line);
            if entry.is_none() {
                debug!("skipping unparsable tlb row: {:?}", line);
            }
            entry
        })
        .filter(|entry| page.map_or(true, |p| entry.virt == p))
        .collect()
}

fn parse_row(line: &str) -> Option<TlbEntry> {
    let mut fields = line.split_whitespace();
    let virt = parse_address(fields.next()?.trim_end_matches(':')).ok()?;
    let phys = parse_address(fields.next()?).ok()?;
    let flags = fields.next().unwrap_or_default().to_string();

    Some(TlbEntry { virt, phys, flags })
}
