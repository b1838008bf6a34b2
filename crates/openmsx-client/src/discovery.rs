//! Finding running emulators.
//!
//! Every emulator with its control socket enabled leaves an entry named
//! `socket.<pid>` in `<tmp>/openmsx-<user>`. On POSIX the entry is a
//! Unix-domain socket; on Windows it is a text file holding a localhost TCP
//! port. Entries that fail the ownership and permission checks are skipped
//! and never touched; entries that pass but refuse connections are stale and
//! get removed.

use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use openmsx_proto::constants::{SOCKET_DIR_PREFIX, SOCKET_PREFIX};
use tracing::{debug, info, trace};

use crate::{connection::Connection, error::ClientError};

/// A validated socket entry. Not yet connected.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Endpoint {
    path: PathBuf,
}

impl Endpoint {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Process id encoded in the entry name, if numeric.
    pub fn pid(&self) -> Option<u32> {
        self.path
            .file_name()?
            .to_str()?
            .strip_prefix(SOCKET_PREFIX)?
            .parse()
            .ok()
    }
}

/// `<tmp>/openmsx-<user>`, `<tmp>` honouring `$TMPDIR`.
pub fn socket_dir() -> PathBuf {
    env::temp_dir().join(format!("{SOCKET_DIR_PREFIX}{}", user_name()))
}

#[cfg(unix)]
fn user_name() -> String {
    use std::ffi::CStr;

    let uid = current_uid();
    let mut buf = vec![0 as libc::c_char; 4096];
    // SAFETY: `passwd` is plain data; getpwuid_r fills it with pointers into
    // `buf`, which outlives every read below.
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut result: *mut libc::passwd = std::ptr::null_mut();
    let rc = unsafe { libc::getpwuid_r(uid, &mut pwd, buf.as_mut_ptr(), buf.len(), &mut result) };
    if rc == 0 && !result.is_null() && !pwd.pw_name.is_null() {
        let name = unsafe { CStr::from_ptr(pwd.pw_name) };
        return name.to_string_lossy().into_owned();
    }
    env::var("USER").unwrap_or_default()
}

#[cfg(not(unix))]
fn user_name() -> String {
    "default".to_string()
}

#[cfg(unix)]
fn current_uid() -> u32 {
    unsafe { libc::getuid() }
}

fn insecure(path: &Path, reason: impl Into<String>) -> ClientError {
    ClientError::Insecure {
        path: path.display().to_string(),
        reason: reason.into(),
    }
}

/// The socket directory must exist and, on POSIX, be private to the
/// current user (owner uid, mode exactly 0700).
pub fn check_socket_dir(dir: &Path) -> Result<(), ClientError> {
    #[cfg(unix)]
    {
        check_socket_dir_for(dir, current_uid())
    }
    #[cfg(not(unix))]
    {
        if fs::metadata(dir)?.is_dir() {
            Ok(())
        } else {
            Err(insecure(dir, "not a directory"))
        }
    }
}

#[cfg(unix)]
fn check_socket_dir_for(dir: &Path, uid: u32) -> Result<(), ClientError> {
    use std::os::unix::fs::MetadataExt;

    let meta = fs::symlink_metadata(dir)?;
    if !meta.is_dir() {
        return Err(insecure(dir, "not a directory"));
    }
    if meta.uid() != uid {
        return Err(insecure(dir, format!("owned by uid {}", meta.uid())));
    }
    let mode = meta.mode() & 0o777;
    if mode != 0o700 {
        return Err(insecure(dir, format!("mode {mode:o}, expected 700")));
    }
    Ok(())
}

/// Entry name must start with `socket.`; on POSIX the entry must be a
/// socket owned by the current user with mode exactly 0600.
pub fn check_socket(path: &Path) -> Result<(), ClientError> {
    #[cfg(unix)]
    {
        check_socket_for(path, current_uid())
    }
    #[cfg(not(unix))]
    {
        check_socket_name(path)
    }
}

fn check_socket_name(path: &Path) -> Result<(), ClientError> {
    let named = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(SOCKET_PREFIX));
    if named {
        Ok(())
    } else {
        Err(insecure(path, format!("name does not start with {SOCKET_PREFIX}")))
    }
}

#[cfg(unix)]
fn check_socket_for(path: &Path, uid: u32) -> Result<(), ClientError> {
    use std::os::unix::fs::{FileTypeExt, MetadataExt};

    check_socket_name(path)?;
    let meta = fs::symlink_metadata(path)?;
    if !meta.file_type().is_socket() {
        return Err(insecure(path, "not a socket"));
    }
    let mode = meta.mode() & 0o777;
    if mode != 0o600 {
        return Err(insecure(path, format!("mode {mode:o}, expected 600")));
    }
    if meta.uid() != uid {
        return Err(insecure(path, format!("owned by uid {}", meta.uid())));
    }
    Ok(())
}

/// Validated entries of `dir`, sorted by path. Nothing is connected or
/// removed.
pub fn scan(dir: &Path) -> Vec<Endpoint> {
    if let Err(e) = check_socket_dir(dir) {
        debug!("Skipping socket directory: {e}");
        return Vec::new();
    }
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Cannot list {}: {e}", dir.display());
            return Vec::new();
        }
    };

    let mut endpoints: Vec<Endpoint> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| match check_socket(path) {
            Ok(()) => true,
            Err(e) => {
                trace!("Skipping entry: {e}");
                false
            }
        })
        .map(|path| Endpoint { path })
        .collect();
    endpoints.sort();
    endpoints
}

/// Open a connection to `endpoint`. Must be called within a tokio runtime.
pub async fn connect_endpoint(endpoint: &Endpoint) -> Result<Arc<Connection>, ClientError> {
    #[cfg(unix)]
    {
        crate::transport::connect_unix(&endpoint.path).await
    }
    #[cfg(not(unix))]
    {
        let text = fs::read_to_string(&endpoint.path)?;
        let port: u16 = text.trim().parse().map_err(|_| {
            ClientError::ConnectionFailed(format!(
                "{} does not hold a port number",
                endpoint.path.display()
            ))
        })?;
        let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));
        crate::transport::connect_tcp(addr).await
    }
}

/// Connect to every emulator in [`socket_dir`].
pub async fn collect_servers() -> Vec<(Endpoint, Arc<Connection>)> {
    collect_servers_in(&socket_dir()).await
}

/// Connect to every valid entry of `dir`, removing the stale ones.
pub async fn collect_servers_in(dir: &Path) -> Vec<(Endpoint, Arc<Connection>)> {
    let mut live = Vec::new();
    for endpoint in scan(dir) {
        match connect_endpoint(&endpoint).await {
            Ok(conn) => live.push((endpoint, conn)),
            Err(e) => {
                info!("Removing stale socket {}: {e}", endpoint.path.display());
                remove_stale(&endpoint.path);
            }
        }
    }
    debug!("Found {} running emulator(s)", live.len());
    live
}

/// Remove the entry and, if it is now empty, its directory.
fn remove_stale(path: &Path) {
    let _ = fs::remove_file(path);
    if let Some(parent) = path.parent() {
        let _ = fs::remove_dir(parent);
    }
}

/// The only element of `found`.
pub fn select_single<T>(found: Vec<T>) -> Result<T, ClientError> {
    let count = found.len();
    let mut found = found.into_iter();
    match (found.next(), found.next()) {
        (Some(only), None) => Ok(only),
        (None, _) => Err(ClientError::NoEmulator),
        (Some(_), Some(_)) => Err(ClientError::Ambiguous(count)),
    }
}
