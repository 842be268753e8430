//! 操作端末のモード制御
//!
//! ログ表示中の端末はエコーなし・非カノニカルモードに置き、
//! コマンドラインを開いている間だけ元のモードに戻します。
//! モードの復元はガードの `Drop` で行うため、エラーやパニックで抜けた場合も元に戻ります。

use crate::Result;
use anyhow::Context as _;
use nix::sys::termios::{self, LocalFlags, SetArg, Termios};
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::path::Path;
use tracing::{debug, warn};

/// 端末モードの取得と設定
pub trait ModeControl {
    /// 端末モード
    type Mode: Clone;

    /// 現在のモードを取得する
    fn current(&self) -> Result<Self::Mode>;

    /// モードを設定する
    fn apply(&self, mode: &Self::Mode) -> Result<()>;

    /// `mode` からエコーと行バッファリングを外したモードを作る
    fn quiet(mode: &Self::Mode) -> Self::Mode;
}

/// 操作端末
pub struct Tty {
    file: File,
}

impl Tty {
    /// 端末デバイスを開く
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open terminal {}", path.display()))?;
        Ok(Self { file })
    }

    /// 開いたファイルから作成する
    pub fn from_file(file: File) -> Self {
        Self { file }
    }

    /// 同じ端末を指す別のハンドルを作る
    pub fn try_clone(&self) -> Result<Self> {
        let file = self.file.try_clone().context("Failed to duplicate terminal handle")?;
        Ok(Self { file })
    }

    /// 1バイト読む（端末が閉じられた場合は `None`）
    pub fn read_key(&self) -> io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        loop {
            match (&self.file).read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(byte[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl ModeControl for Tty {
    type Mode = Termios;

    fn current(&self) -> Result<Termios> {
        termios::tcgetattr(&self.file).context("Failed to read terminal mode")
    }

    fn apply(&self, mode: &Termios) -> Result<()> {
        termios::tcsetattr(&self.file, SetArg::TCSANOW, mode).context("Failed to set terminal mode")
    }

    fn quiet(mode: &Termios) -> Termios {
        let mut quiet = mode.clone();
        quiet.local_flags.remove(LocalFlags::ECHO | LocalFlags::ICANON);
        quiet
    }
}

/// 起動時に取得した端末モードと、ログ表示用のモード
pub struct TerminalModes<T: ModeControl> {
    control: T,
    original: T::Mode,
    quiet: T::Mode,
}

impl<T: ModeControl> TerminalModes<T> {
    /// 現在のモードを元のモードとして記録する
    pub fn capture(control: T) -> Result<Self> {
        let original = control.current()?;
        Ok(Self::with_original(control, original))
    }

    /// 元のモードを指定して作成する
    pub fn with_original(control: T, original: T::Mode) -> Self {
        let quiet = T::quiet(&original);
        Self {
            control,
            original,
            quiet,
        }
    }

    /// ログ表示用のモードに切り替える
    pub fn enter_quiet(&self) -> Result<()> {
        debug!("terminal: entering quiet mode");
        self.control.apply(&self.quiet)
    }

    /// 元のモードに戻す
    pub fn restore(&self) -> Result<()> {
        debug!("terminal: restoring original mode");
        self.control.apply(&self.original)
    }

    /// 元のモードに戻し、スコープを抜けるときにログ表示用のモードへ戻すガードを返す
    pub fn cooked(&self) -> Result<CookedScope<'_, T>> {
        self.restore()?;
        Ok(CookedScope { modes: self })
    }

    pub fn control(&self) -> &T {
        &self.control
    }

    /// 起動時のモード
    pub fn original(&self) -> &T::Mode {
        &self.original
    }
}

/// コマンドラインを開いている間のガード
pub struct CookedScope<'a, T: ModeControl> {
    modes: &'a TerminalModes<T>,
}

impl<T: ModeControl> Drop for CookedScope<'_, T> {
    fn drop(&mut self) {
        if let Err(e) = self.modes.enter_quiet() {
            warn!("failed to re-enter quiet terminal mode: {:#}", e);
        }
    }
}

/// 終了時に元の端末モードへ戻すガード
pub struct RestoreOnDrop<'a, T: ModeControl> {
    modes: &'a TerminalModes<T>,
}

impl<'a, T: ModeControl> RestoreOnDrop<'a, T> {
    pub fn new(modes: &'a TerminalModes<T>) -> Self {
        Self { modes }
    }
}

impl<T: ModeControl> Drop for RestoreOnDrop<'_, T> {
    fn drop(&mut self) {
        if let Err(e) = self.modes.restore() {
            warn!("failed to restore terminal mode: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::panic::{self, AssertUnwindSafe};

    /// モードを (エコー, カノニカル) の組で表す端末
    struct MockTerminal {
        mode: RefCell<(bool, bool)>,
        applied: RefCell<Vec<(bool, bool)>>,
    }

    impl MockTerminal {
        fn new() -> Self {
            Self {
                mode: RefCell::new((true, true)),
                applied: RefCell::new(Vec::new()),
            }
        }
    }

    impl ModeControl for MockTerminal {
        type Mode = (bool, bool);

        fn current(&self) -> Result<(bool, bool)> {
            Ok(*self.mode.borrow())
        }

        fn apply(&self, mode: &(bool, bool)) -> Result<()> {
            *self.mode.borrow_mut() = *mode;
            self.applied.borrow_mut().push(*mode);
            Ok(())
        }

        fn quiet(_mode: &(bool, bool)) -> (bool, bool) {
            (false, false)
        }
    }

    #[test]
    fn test_cooked_scope_restores_quiet() {
        let modes = TerminalModes::capture(MockTerminal::new()).unwrap();
        modes.enter_quiet().unwrap();

        {
            let _scope = modes.cooked().unwrap();
            assert_eq!(modes.control().current().unwrap(), (true, true));
        }
        assert_eq!(modes.control().current().unwrap(), (false, false));
    }

    #[test]
    fn test_cooked_scope_restores_on_panic() {
        let modes = TerminalModes::capture(MockTerminal::new()).unwrap();
        modes.enter_quiet().unwrap();

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let _scope = modes.cooked().unwrap();
            panic!("command loop failed");
        }));
        assert!(result.is_err());
        assert_eq!(modes.control().current().unwrap(), (false, false));
    }

    #[test]
    fn test_restore_on_drop() {
        let modes = TerminalModes::capture(MockTerminal::new()).unwrap();
        modes.enter_quiet().unwrap();
        drop(RestoreOnDrop::new(&modes));

        assert_eq!(
            *modes.control().applied.borrow(),
            vec![(false, false), (true, true)]
        );
    }

    #[test]
    fn test_pty_mode_round_trip() {
        let pty = nix::pty::openpty(None, None).unwrap();
        let tty = Tty::from_file(File::from(pty.slave));

        let modes = TerminalModes::capture(tty).unwrap();
        let original = modes.control().current().unwrap();

        modes.enter_quiet().unwrap();
        let quiet = modes.control().current().unwrap();
        assert!(!quiet.local_flags.contains(LocalFlags::ECHO));
        assert!(!quiet.local_flags.contains(LocalFlags::ICANON));

        drop(RestoreOnDrop::new(&modes));
        assert_eq!(modes.control().current().unwrap().local_flags, original.local_flags);
    }
}
