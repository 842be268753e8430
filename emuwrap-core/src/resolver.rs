//! アドレス解決機能
//!
//! 外部のリゾルバ（`addr2line`）をアドレスごとに起動し、結果をバイナリ単位でキャッシュします。

use crate::errors::ResolveError;
use crate::parse::parse_address;
use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// 不明なフィールドの表示
pub const UNKNOWN: &str = "??";

/// 解決されたフレーム
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFrame {
    /// 関数名
    pub function: String,
    /// ソースファイル
    pub file: String,
    /// 行番号（リゾルバの出力のまま）
    pub line: String,
}

impl ResolvedFrame {
    /// フレームを作成する
    pub fn new(function: impl Into<String>, file: impl Into<String>, line: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            file: file.into(),
            line: line.into(),
        }
    }

    /// 解決できなかったフレーム
    pub fn unknown() -> Self {
        Self::new(UNKNOWN, UNKNOWN, UNKNOWN)
    }
}

impl fmt::Display for ResolvedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}:{}", self.function, self.file, self.line)
    }
}

/// アドレスからソース位置を問い合わせるバックエンド
pub trait SymbolLookup {
    /// `binary` 内の `address` についてリゾルバの生の出力を返す
    fn lookup(&self, binary: &Path, address: &str) -> Result<String, ResolveError>;
}

/// `addr2line` を起動するバックエンド
#[derive(Debug, Clone)]
pub struct Addr2LineCommand {
    program: PathBuf,
    leading_args: Vec<OsString>,
}

impl Addr2LineCommand {
    /// プログラムを指定して作成する
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    /// `addr2line` 互換の引数の前に渡す引数を設定する
    pub fn with_leading_args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }
}

impl SymbolLookup for Addr2LineCommand {
    fn lookup(&self, binary: &Path, address: &str) -> Result<String, ResolveError> {
        debug!("spawning {} for {} at {}", self.program.display(), binary.display(), address);

        // -f: 関数名, -C: デマングル, -i: インライン展開, -p: 1フレーム1行
        let output = Command::new(&self.program)
            .args(&self.leading_args)
            .arg("-e")
            .arg(binary)
            .args(["-f", "-C", "-i", "-p"])
            .arg(address)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ResolveError::Spawn {
                program: self.program.display().to_string(),
                reason: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();

        if !output.status.success() && stdout.trim().is_empty() {
            return Err(ResolveError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(stdout)
    }
}

/// リゾルバの出力をフレームの列に変換する
///
/// 出力の各行は `func at file:line` の形式で、インライン展開されたフレームは
/// `(inlined by) func at file:line` となりフィールドが2つずれます。
/// 連続する同一のフレームは最初の1つだけを残します。
pub fn parse_frames(output: &str) -> Vec<ResolvedFrame> {
    let mut frames: Vec<ResolvedFrame> = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let offset = if line.contains("(inlined") { 2 } else { 0 };
        let fields: Vec<&str> = line.split([' ', ':']).collect();

        let frame = match (fields.get(offset), fields.get(offset + 2), fields.get(offset + 3)) {
            (Some(function), Some(file), Some(linenr)) => ResolvedFrame::new(*function, *file, *linenr),
            _ => ResolvedFrame::unknown(),
        };

        if frames.last() == Some(&frame) {
            continue;
        }
        frames.push(frame);
    }

    frames
}

/// 1つのバイナリに対する解決結果のキャッシュ
///
/// 失敗も保存するため、同じアドレスでリゾルバを再度起動することはありません。
#[derive(Debug, Default)]
struct BinaryCache {
    entries: HashMap<u64, Result<Vec<ResolvedFrame>, ResolveError>>,
}

/// キャッシュ付きのアドレスリゾルバ
pub struct AddressResolver {
    lookup: Box<dyn SymbolLookup>,
    /// バイナリ -> アドレス -> フレーム列
    caches: HashMap<PathBuf, BinaryCache>,
}

impl AddressResolver {
    /// バックエンドを指定して作成する
    pub fn new(lookup: Box<dyn SymbolLookup>) -> Self {
        Self {
            lookup,
            caches: HashMap::new(),
        }
    }

    /// `binary` 内の `address` をフレームの列に解決する
    ///
    /// キャッシュにあればそれを返し、なければリゾルバを起動します。
    /// フレームが1つも得られなかった場合は [`ResolveError::NoRecords`] を返します。
    pub fn resolve(&mut self, binary: &Path, address: &str) -> Result<Vec<ResolvedFrame>, ResolveError> {
        let addr = parse_address(address).map_err(|_| ResolveError::InvalidAddress(address.to_string()))?;

        let cache = self.caches.entry(binary.to_path_buf()).or_default();
        if let Some(cached) = cache.entries.get(&addr) {
            return cached.clone();
        }

        let result = self
            .lookup
            .lookup(binary, &format!("{:#x}", addr))
            .map(|output| parse_frames(&output))
            .and_then(|frames| {
                if frames.is_empty() {
                    Err(ResolveError::NoRecords {
                        binary: binary.display().to_string(),
                        address: address.to_string(),
                    })
                } else {
                    Ok(frames)
                }
            });

        cache.entries.insert(addr, result.clone());
        result
    }

    /// キャッシュされているエントリの総数
    pub fn cached_entries(&self) -> usize {
        self.caches.values().map(|c| c.entries.len()).sum()
    }

    /// キャッシュを持つバイナリの数
    pub fn cached_binaries(&self) -> usize {
        self.caches.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// 呼び出しを記録し、固定の出力を返すバックエンド
    struct RecordingLookup {
        calls: Rc<RefCell<Vec<(PathBuf, String)>>>,
        output: String,
    }

    impl SymbolLookup for RecordingLookup {
        fn lookup(&self, binary: &Path, address: &str) -> Result<String, ResolveError> {
            self.calls.borrow_mut().push((binary.to_path_buf(), address.to_string()));
            Ok(self.output.clone())
        }
    }

    fn recording(output: &str) -> (AddressResolver, Rc<RefCell<Vec<(PathBuf, String)>>>) {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let lookup = RecordingLookup {
            calls: Rc::clone(&calls),
            output: output.to_string(),
        };
        (AddressResolver::new(Box::new(lookup)), calls)
    }

    #[test]
    fn test_parse_single_frame() {
        let frames = parse_frames("kmain at /src/init/main.c:42\n");
        assert_eq!(frames, vec![ResolvedFrame::new("kmain", "/src/init/main.c", "42")]);
    }

    #[test]
    fn test_parse_inlined_frames() {
        let output = "\
list_del at /src/include/list.h:80
 (inlined by) process_exit at /src/kernel/exit.c:120 (discriminator 2)
";
        let frames = parse_frames(output);
        assert_eq!(
            frames,
            vec![
                ResolvedFrame::new("list_del", "/src/include/list.h", "80"),
                ResolvedFrame::new("process_exit", "/src/kernel/exit.c", "120"),
            ]
        );
    }

    #[test]
    fn test_parse_collapses_consecutive_duplicates() {
        let output = "\
f at a.c:1
 (inlined by) f at a.c:1
g at b.c:2
f at a.c:1
";
        let frames = parse_frames(output);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].function, "f");
        assert_eq!(frames[1].function, "g");
        assert_eq!(frames[2].function, "f");
    }

    #[test]
    fn test_parse_unknown_location() {
        // 行番号のフィールドが欠けている場合は不明なフレームになる
        let frames = parse_frames("?? ??:0\n");
        assert_eq!(frames, vec![ResolvedFrame::unknown()]);
        assert!(parse_frames("").is_empty());
    }

    #[test]
    fn test_resolve_uses_cache() {
        let (mut resolver, calls) = recording("kmain at main.c:42\n");
        let binary = Path::new("system");

        let first = resolver.resolve(binary, "0x00001000").unwrap();
        let second = resolver.resolve(binary, "0x1000").unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.borrow().len(), 1);
        assert_eq!(calls.borrow()[0].1, "0x1000");
    }

    #[test]
    fn test_resolve_separates_binaries() {
        let (mut resolver, calls) = recording("f at a.c:1\n");

        resolver.resolve(Path::new("system"), "0x1000").unwrap();
        resolver.resolve(Path::new("mnt/bin/sh"), "0x1000").unwrap();

        assert_eq!(calls.borrow().len(), 2);
        assert_eq!(resolver.cached_entries(), 2);
        assert_eq!(resolver.cached_binaries(), 2);
    }

    #[test]
    fn test_resolve_caches_failures() {
        let (mut resolver, calls) = recording("");
        let binary = Path::new("system");

        let err = resolver.resolve(binary, "0x1000").unwrap_err();
        assert!(matches!(err, ResolveError::NoRecords { .. }));
        assert!(resolver.resolve(binary, "0x1000").is_err());
        assert_eq!(calls.borrow().len(), 1);
    }

    #[test]
    fn test_resolve_invalid_address() {
        let (mut resolver, calls) = recording("f at a.c:1\n");
        let err = resolver.resolve(Path::new("system"), "zzz").unwrap_err();
        assert_eq!(err, ResolveError::InvalidAddress("zzz".to_string()));
        assert!(calls.borrow().is_empty());
    }
}
