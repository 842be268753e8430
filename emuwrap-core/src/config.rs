//! セッション設定

use std::path::PathBuf;
use std::time::Duration;

/// 読み取り待ちのデフォルトタイムアウト
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(20);

/// 1回の読み取りで要求する最大バイト数
pub const DEFAULT_READ_SIZE: usize = 0x10000;

/// セッション全体の設定
///
/// CLIの引数から組み立てられ、[`SessionContext`](crate::SessionContext) が所有します。
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// カーネルのバイナリ（カーネル形式のフレームの解決先）
    pub kernel_binary: PathBuf,
    /// ユーザー空間のパスの前に付けるプレフィックス（ゲストのルートファイルシステム）
    pub sysroot: String,
    /// この値以上のアドレスをカーネル空間とみなす
    ///
    /// `None` の場合、カーネル形式のフレームはすべてカーネルのバイナリで解決します。
    pub kernel_threshold: Option<u64>,
    /// パスにこの文字列が含まれていればシンボルなしとみなす
    pub no_symbols_marker: String,
    /// 外部リゾルバのプログラム
    pub resolver: PathBuf,
    /// 読み取り待ちのタイムアウト
    pub poll_timeout: Duration,
    /// 1回の読み取りの最大バイト数
    pub read_size: usize,
}

impl SessionConfig {
    /// ユーザー空間のパスをホスト上のバイナリのパスに変換する
    ///
    /// パスは絶対パス（`/bin/sh`）で渡されるため、`PathBuf::join` ではなく文字列として連結します。
    pub fn userspace_binary(&self, path: &str) -> PathBuf {
        PathBuf::from(format!("{}{}", self.sysroot, path))
    }

    /// パスがシンボルを持たないバイナリを指しているか
    pub fn lacks_symbols(&self, path: &str) -> bool {
        !self.no_symbols_marker.is_empty() && path.contains(&self.no_symbols_marker)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            kernel_binary: PathBuf::from("system"),
            sysroot: "mnt".to_string(),
            kernel_threshold: None,
            no_symbols_marker: "[".to_string(),
            resolver: PathBuf::from("addr2line"),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            read_size: DEFAULT_READ_SIZE,
        }
    }
}
