//! セッションの状態

use crate::config::SessionConfig;
use crate::errors::ResolveError;
use crate::parse::parse_address;
use crate::resolver::{Addr2LineCommand, AddressResolver, ResolvedFrame, SymbolLookup};
use std::path::{Path, PathBuf};
use tracing::debug;

/// 捕捉した内部エラーのID
pub type FailureId = usize;

/// セッション中に捕捉した内部エラー
#[derive(Debug, Clone)]
pub struct CapturedFailure {
    pub id: FailureId,
    /// エラーチェーンを含む診断メッセージ全文
    pub detail: String,
}

/// 1回のセッションで共有される状態
///
/// 主ループだけが所有し、モニタのスレッドからは見えません。
pub struct SessionContext {
    config: SessionConfig,
    /// バイナリごとのキャッシュを持つリゾルバ
    resolver: AddressResolver,
    /// 現在のバックトレースで最後に表示したフレーム番号
    frame_counter: usize,
    /// 捕捉した内部エラー（IDは添字と一致）
    failures: Vec<CapturedFailure>,
    /// 最後にログに現れたユーザー空間のバイナリ
    active_binary: Option<PathBuf>,
}

impl SessionContext {
    /// バックエンドを指定してセッションを作成する
    pub fn new(config: SessionConfig, lookup: Box<dyn SymbolLookup>) -> Self {
        Self {
            config,
            resolver: AddressResolver::new(lookup),
            frame_counter: 0,
            failures: Vec::new(),
            active_binary: None,
        }
    }

    /// 設定されたリゾルバプログラムを使うセッションを作成する
    pub fn with_addr2line(config: SessionConfig) -> Self {
        let lookup = Addr2LineCommand::new(config.resolver.clone());
        Self::new(config, Box::new(lookup))
    }

    /// 設定を取得
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// リゾルバへの参照を取得
    pub fn resolver(&self) -> &AddressResolver {
        &self.resolver
    }

    /// アドレスを解決する
    pub fn resolve(&mut self, binary: &Path, address: &str) -> Result<Vec<ResolvedFrame>, ResolveError> {
        self.resolver.resolve(binary, address)
    }

    /// フレーム番号をリセットする（新しいバックトレースの開始）
    pub fn reset_frames(&mut self) {
        self.frame_counter = 0;
    }

    /// フレーム番号を1つ進めて返す
    pub fn next_frame(&mut self) -> usize {
        self.frame_counter += 1;
        self.frame_counter
    }

    /// 現在のフレーム番号
    pub fn frame_counter(&self) -> usize {
        self.frame_counter
    }

    /// 内部エラーを捕捉し、新しいIDを返す
    pub fn capture(&mut self, error: anyhow::Error) -> FailureId {
        let id = self.failures.len();
        debug!("captured internal failure #{}: {:#}", id, error);
        self.failures.push(CapturedFailure {
            id,
            detail: format!("{:?}", error),
        });
        id
    }

    /// 捕捉した内部エラーの一覧
    pub fn failures(&self) -> &[CapturedFailure] {
        &self.failures
    }

    /// 最後にログに現れたユーザー空間のバイナリ
    pub fn active_binary(&self) -> Option<&Path> {
        self.active_binary.as_deref()
    }

    /// ユーザー空間のバイナリを記録する
    pub fn set_active_binary(&mut self, binary: PathBuf) {
        if self.active_binary.as_ref() != Some(&binary) {
            debug!("active binary is now {}", binary.display());
            self.active_binary = Some(binary);
        }
    }

    /// カーネル形式のフレームのアドレスをどのバイナリで解決するか決める
    ///
    /// 閾値が設定されていて、アドレスがそれより小さく、ユーザー空間のバイナリが分かっている場合は
    /// そのバイナリを、それ以外はカーネルのバイナリを使います。
    pub fn binary_for_kernel_frame(&self, address: &str) -> PathBuf {
        let user_space = match (self.config.kernel_threshold, parse_address(address)) {
            (Some(threshold), Ok(addr)) => addr < threshold,
            _ => false,
        };

        match (user_space, &self.active_binary) {
            (true, Some(binary)) => binary.clone(),
            _ => self.config.kernel_binary.clone(),
        }
    }
}
