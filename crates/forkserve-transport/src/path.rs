use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SOCKET: AtomicU64 = AtomicU64::new(0);

/// Build a socket path inside `dir` that no other router in this process
/// (or any other live process) will pick.
///
/// The name combines the process id with a per-process counter, so several
/// routers can coexist in one test binary.
pub fn unique_socket_path(dir: impl AsRef<Path>) -> PathBuf {
    let n = NEXT_SOCKET.fetch_add(1, Ordering::Relaxed);
    dir.as_ref()
        .join(format!("forkserve-{}-{n}.sock", std::process::id()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_distinct_within_a_process() {
        let a = unique_socket_path("/tmp");
        let b = unique_socket_path("/tmp");
        assert_ne!(a, b);
        assert!(a.starts_with("/tmp"));
        assert_eq!(a.extension().and_then(|e| e.to_str()), Some("sock"));
    }
}
