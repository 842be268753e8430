//! ファイルディスクリプタからのチャンク読み取り

use emuwrap_core::ChunkSource;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::io::{self, Read};
use std::os::fd::AsFd;
use std::time::Duration;

/// poll(2) で待ってから読み取るソース
///
/// パイプやFIFOのように、読み取り可能になった時点で届いている分だけを返すストリームに使います。
pub struct FdSource<R> {
    inner: R,
}

impl<R: Read + AsFd> FdSource<R> {
    /// ソースを作成する
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// 内部のストリームを取り出す
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// 読み取り可能になるまで最大 `timeout` 待つ
    fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
        let mut fds = [PollFd::new(self.inner.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, poll_timeout(timeout)) {
            Ok(0) => Ok(false),
            // POLLHUPだけの場合も読み取りで終端を検出する
            Ok(_) => Ok(true),
            Err(Errno::EINTR) => Ok(false),
            Err(e) => Err(io::Error::from(e)),
        }
    }
}

impl<R: Read + AsFd> ChunkSource for FdSource<R> {
    fn read_chunk(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>> {
        if !self.wait_readable(timeout)? {
            return Ok(None);
        }

        loop {
            match self.inner.read(buf) {
                Ok(n) => return Ok(Some(n)),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }
}

/// poll(2) のタイムアウト（ミリ秒、上限で切り詰め）
fn poll_timeout(timeout: Duration) -> PollTimeout {
    let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
    PollTimeout::from(millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use emuwrap_core::{LineReader, StreamError};
    use std::io::Write;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_timeout_without_data() {
        let (ours, _theirs) = UnixStream::pair().unwrap();
        let mut source = FdSource::new(ours);
        let mut buf = [0u8; 16];
        assert_eq!(source.read_chunk(&mut buf, Duration::from_millis(5)).unwrap(), None);
    }

    #[test]
    fn test_reads_available_data() {
        let (ours, mut theirs) = UnixStream::pair().unwrap();
        theirs.write_all(b"abc").unwrap();

        let mut source = FdSource::new(ours);
        let mut buf = [0u8; 16];
        assert_eq!(source.read_chunk(&mut buf, Duration::from_millis(100)).unwrap(), Some(3));
        assert_eq!(&buf[..3], b"abc");
    }

    #[test]
    fn test_line_reader_until_eof() {
        let (ours, mut theirs) = UnixStream::pair().unwrap();
        theirs.write_all(b"0,1,0.1;hello\n(qemu) ").unwrap();
        drop(theirs);

        let mut reader = LineReader::new(FdSource::new(ours), Duration::from_millis(20), 4);
        assert_eq!(reader.read_line().unwrap(), "0,1,0.1;hello");
        assert_eq!(reader.read_line().unwrap(), "(qemu) ");
        assert!(matches!(reader.read_line(), Err(StreamError::Eof)));
    }
}
