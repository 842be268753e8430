//! エラー型

use thiserror::Error;

/// 行ストリームの読み取りで発生する状態
#[derive(Debug, Error)]
pub enum StreamError {
    /// ストリームの終端（エラーではなく正常終了のシグナル）
    #[error("end of stream")]
    Eof,
    /// 読み取り自体の失敗
    #[error("failed to read from stream: {0}")]
    Io(#[from] std::io::Error),
}

/// アドレス解決の失敗
///
/// キャッシュに保存するため `Clone` を実装します。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// リゾルバを起動できなかった
    #[error("failed to spawn resolver `{program}`: {reason}")]
    Spawn { program: String, reason: String },
    /// リゾルバが異常終了し、出力もなかった
    #[error("resolver exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    /// 出力にフレームが1つも含まれていなかった
    #[error("No entries given for {binary} at {address}")]
    NoRecords { binary: String, address: String },
    /// アドレスとして解釈できない文字列
    #[error("invalid address '{0}'")]
    InvalidAddress(String),
}
