use std::fs;
use std::io;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::stream::LocalStream;

/// Only the user that started the router may connect.
pub const DEFAULT_SOCKET_MODE: u32 = 0o600;

// Size of sockaddr_un.sun_path, including the trailing NUL.
#[cfg(target_os = "linux")]
const SUN_PATH_LEN: usize = 108;
#[cfg(not(target_os = "linux"))]
const SUN_PATH_LEN: usize = 104;

/// The socket file a router created. Dropping the guard unlinks it, unless
/// something else now lives at that path.
#[derive(Debug)]
pub struct SocketGuard {
    path: PathBuf,
    dev: u64,
    ino: u64,
}

impl SocketGuard {
    /// Bind a listener at `path`, clearing out a socket left by a router
    /// that died without cleaning up.
    #[cfg_attr(not(feature = "async"), allow(dead_code))]
    pub(crate) fn bind(path: &Path, mode: u32) -> Result<(UnixListener, Self)> {
        let failed = |source: io::Error| TransportError::Bind {
            path: path.to_path_buf(),
            source,
        };

        let len = path.as_os_str().len();
        if len >= SUN_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path: path.to_path_buf(),
                len,
                max: SUN_PATH_LEN - 1,
            });
        }

        match fs::symlink_metadata(path) {
            Ok(existing) if existing.file_type().is_socket() => {
                debug!(?path, "replacing leftover socket");
                fs::remove_file(path).map_err(failed)?;
            }
            Ok(_) => {
                return Err(failed(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "path is taken by something that is not a socket",
                )))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(failed(err)),
        }

        let listener = UnixListener::bind(path).map_err(failed)?;
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(failed)?;
        let created = fs::symlink_metadata(path).map_err(failed)?;
        info!(?path, mode = %format!("{mode:o}"), "worker socket ready");

        Ok((
            listener,
            Self {
                path: path.to_path_buf(),
                dev: created.dev(),
                ino: created.ino(),
            },
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn still_ours(&self) -> bool {
        fs::symlink_metadata(&self.path).is_ok_and(|now| {
            now.file_type().is_socket() && now.dev() == self.dev && now.ino() == self.ino
        })
    }
}

impl Drop for SocketGuard {
    fn drop(&mut self) {
        if !self.still_ours() {
            debug!(path = ?self.path, "socket path was replaced, leaving it");
            return;
        }
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(path = ?self.path, error = %err, "could not remove worker socket");
        }
    }
}

/// Dial the router's socket from a worker.
pub fn connect(path: impl AsRef<Path>) -> Result<LocalStream> {
    let path = path.as_ref();
    match UnixStream::connect(path) {
        Ok(stream) => {
            debug!(?path, "connected to router");
            Ok(LocalStream::from_unix(stream))
        }
        Err(source) => Err(TransportError::Connect {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// The router's listening socket. Needs a running tokio runtime.
#[cfg(feature = "async")]
pub struct AsyncLocalListener {
    listener: tokio::net::UnixListener,
    guard: SocketGuard,
}

#[cfg(feature = "async")]
impl AsyncLocalListener {
    /// Listen at `path` with [`DEFAULT_SOCKET_MODE`].
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, DEFAULT_SOCKET_MODE)
    }

    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let (std_listener, guard) = SocketGuard::bind(path.as_ref(), mode)?;
        let to_tokio = |l: UnixListener| {
            l.set_nonblocking(true)?;
            tokio::net::UnixListener::from_std(l)
        };
        let listener = to_tokio(std_listener).map_err(|source| TransportError::Bind {
            path: guard.path().to_path_buf(),
            source,
        })?;
        Ok(Self { listener, guard })
    }

    pub async fn accept(&self) -> Result<tokio::net::UnixStream> {
        let (stream, _) = self.listener.accept().await.map_err(TransportError::Accept)?;
        Ok(stream)
    }

    pub fn path(&self) -> &Path {
        self.guard.path()
    }

    /// Hand the listener to an accept loop while the caller keeps the guard
    /// and so decides when the socket file disappears.
    pub fn into_parts(self) -> (tokio::net::UnixListener, SocketGuard) {
        (self.listener, self.guard)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    fn sock(dir: &tempfile::TempDir, name: &str) -> PathBuf {
        dir.path().join(name)
    }

    #[test]
    fn worker_reaches_router_and_file_goes_away_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = sock(&dir, "router.sock");
        let (listener, guard) = SocketGuard::bind(&path, DEFAULT_SOCKET_MODE).unwrap();

        let worker = {
            let path = path.clone();
            std::thread::spawn(move || connect(path).unwrap().write_all(b"ready").unwrap())
        };
        let (mut accepted, _) = listener.accept().unwrap();
        let mut got = String::new();
        worker.join().unwrap();
        accepted.read_to_string(&mut got).unwrap();
        assert_eq!(got, "ready");

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, DEFAULT_SOCKET_MODE);

        drop(guard);
        assert!(!path.exists());
    }

    #[test]
    fn overlong_path_is_refused_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let path = sock(&dir, &"w".repeat(SUN_PATH_LEN));
        let err = SocketGuard::bind(&path, DEFAULT_SOCKET_MODE).unwrap_err();
        assert!(matches!(err, TransportError::PathTooLong { max, .. } if max == SUN_PATH_LEN - 1));
    }

    #[test]
    fn leftover_socket_from_a_dead_router_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = sock(&dir, "stale.sock");
        drop(UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let (_listener, guard) = SocketGuard::bind(&path, DEFAULT_SOCKET_MODE).unwrap();
        assert_eq!(guard.path(), path);
    }

    #[test]
    fn regular_file_is_never_clobbered() {
        let dir = tempfile::tempdir().unwrap();
        let path = sock(&dir, "bundle.js");
        fs::write(&path, "console.log(1)").unwrap();

        let err = SocketGuard::bind(&path, DEFAULT_SOCKET_MODE).unwrap_err();
        assert!(matches!(err, TransportError::Bind { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), "console.log(1)");
    }

    #[test]
    fn replaced_path_survives_the_guard() {
        let dir = tempfile::tempdir().unwrap();
        let path = sock(&dir, "swap.sock");
        let (_listener, guard) = SocketGuard::bind(&path, DEFAULT_SOCKET_MODE).unwrap();
        fs::remove_file(&path).unwrap();
        fs::write(&path, "someone else's").unwrap();

        drop(guard);
        assert!(path.exists());
    }

    #[test]
    fn dialing_nothing_is_a_connect_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = connect(sock(&dir, "nobody.sock")).unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
        assert!(err.io().is_some());
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn async_listener_takes_blocking_workers() {
        use tokio::io::AsyncReadExt;

        let dir = tempfile::tempdir().unwrap();
        let path = sock(&dir, "async.sock");
        let listener = AsyncLocalListener::bind(&path).unwrap();

        let worker = {
            let path = path.clone();
            std::thread::spawn(move || connect(path).unwrap().write_all(b"ios").unwrap())
        };
        let mut stream = listener.accept().await.unwrap();
        let mut platform = [0u8; 3];
        stream.read_exact(&mut platform).await.unwrap();
        worker.join().unwrap();
        assert_eq!(&platform, b"ios");

        let (_raw, guard) = listener.into_parts();
        drop(guard);
        assert!(!path.exists());
    }
}
