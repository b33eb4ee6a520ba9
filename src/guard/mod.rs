//! Named exclusive resource guards.
//!
//! A guard is an OS-level advisory lock on a file derived from the guard's name
//! and scope. The lock lives on the open file description, so a second
//! acquisition of the same name fails whether it comes from another process or
//! from another guard inside this one.

use crate::error::LifecycleError;
use camino::{Utf8Path, Utf8PathBuf};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;

/// Where a guard name is unique.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardScope {
    /// Unique for the current user session.
    #[default]
    Local,
    /// Unique for every user of the machine.
    Global,
}

impl GuardScope {
    /// Prefix used in the lock file name.
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Local => "Local",
            Self::Global => "Global",
        }
    }

    /// Default directory holding lock files for this scope.
    pub fn default_lock_dir(self) -> Result<Utf8PathBuf, LifecycleError> {
        let dir = match self {
            Self::Local => dirs::runtime_dir()
                .or_else(dirs::cache_dir)
                .unwrap_or_else(std::env::temp_dir)
                .join("loophost"),
            Self::Global => std::env::temp_dir().join("loophost-global"),
        };

        Utf8PathBuf::try_from(dir).map_err(|e| LifecycleError::GuardUnavailable {
            name: self.prefix().to_string(),
            reason: format!("lock directory is not valid UTF-8: {}", e),
        })
    }
}

impl fmt::Display for GuardScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// A named, optionally system-wide, exclusive lock.
///
/// `acquire` never fails because the name is already held; it returns an
/// unlocked guard instead. Check [`is_locked`](Self::is_locked).
pub struct ExclusiveResourceGuard {
    name: String,
    scope: GuardScope,
    path: Utf8PathBuf,
    lock: Mutex<Option<os::LockHandle>>,
}

impl ExclusiveResourceGuard {
    /// Try to acquire `name` in the default lock directory for `scope`.
    ///
    /// # Errors
    /// - `InvalidConfiguration` when `name` is empty
    /// - `GuardUnavailable` when the lock file cannot be created or locked
    pub fn acquire(name: &str, scope: GuardScope) -> Result<Self, LifecycleError> {
        validate_name(name)?;
        let dir = scope.default_lock_dir()?;
        Self::acquire_in(&dir, name, scope)
    }

    /// Try to acquire `name` with lock files placed in `dir`.
    pub fn acquire_in(
        dir: &Utf8Path,
        name: &str,
        scope: GuardScope,
    ) -> Result<Self, LifecycleError> {
        validate_name(name)?;

        let unavailable = |reason: String| LifecycleError::GuardUnavailable {
            name: name.to_string(),
            reason,
        };

        let shared = scope == GuardScope::Global;
        if !dir.is_dir() {
            os::create_lock_dir(dir, shared)
                .map_err(|e| unavailable(format!("failed to create {}: {}", dir, e)))?;
        }

        let path = dir.join(lock_file_name(name, scope));
        let file = open_lock_file(&path, shared)
            .map_err(|e| unavailable(format!("failed to open {}: {}", path, e)))?;

        let lock = os::try_lock(file)
            .map_err(|e| unavailable(format!("failed to lock {}: {}", path, e)))?;

        if lock.is_some() {
            tracing::debug!(name, %scope, %path, "Exclusive resource acquired");
        } else {
            tracing::debug!(name, %scope, %path, "Exclusive resource held elsewhere");
        }

        Ok(Self {
            name: name.to_string(),
            scope,
            path,
            lock: Mutex::new(lock),
        })
    }

    /// Whether this guard holds the resource.
    pub fn is_locked(&self) -> bool {
        self.lock.lock().is_some()
    }

    /// Release the resource. Safe to call repeatedly, and on a guard that
    /// never acquired anything.
    pub fn release(&self) {
        if self.lock.lock().take().is_some() {
            tracing::debug!(name = %self.name, scope = %self.scope, "Exclusive resource released");
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> GuardScope {
        self.scope
    }

    /// The lock file backing this guard.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl fmt::Debug for ExclusiveResourceGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExclusiveResourceGuard")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("path", &self.path)
            .field("locked", &self.is_locked())
            .finish()
    }
}

impl Drop for ExclusiveResourceGuard {
    fn drop(&mut self) {
        self.release();
    }
}

fn validate_name(name: &str) -> Result<(), LifecycleError> {
    if name.trim().is_empty() {
        return Err(LifecycleError::InvalidConfiguration(
            "exclusive resource name must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Opens the lock file read-write, creating it if needed.
///
/// A file created by another user may not be writable by us. An exclusive
/// lock does not need write access, so that case falls back to read-only.
fn open_lock_file(path: &Utf8Path, shared: bool) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).truncate(false).read(true).write(true);
    os::shared_file_mode(&mut options, shared);

    match options.open(path) {
        Ok(file) => {
            if shared {
                os::widen_file(&file);
            }
            Ok(file)
        }
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            tracing::debug!(%path, "Lock file not writable, locking read-only");
            OpenOptions::new().read(true).open(path)
        }
        Err(e) => Err(e),
    }
}

/// `Local-my_app.lock` for `("my/app", Local)`.
fn lock_file_name(name: &str, scope: GuardScope) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}-{}.lock", scope.prefix(), sanitized)
}

#[cfg(unix)]
mod os {
    use nix::errno::Errno;
    use nix::fcntl::{Flock, FlockArg};
    use camino::Utf8Path;
    use std::fs::{self, DirBuilder, File, OpenOptions, Permissions};
    use std::io;
    use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};

    pub(super) type LockHandle = Flock<File>;

    /// World-writable with the sticky bit, like `/tmp`.
    const SHARED_DIR_MODE: u32 = 0o1777;
    const SHARED_FILE_MODE: u32 = 0o666;

    /// Creates `dir`. A shared directory is opened up to every user; the
    /// umask would otherwise narrow the requested mode.
    pub(super) fn create_lock_dir(dir: &Utf8Path, shared: bool) -> io::Result<()> {
        let mut builder = DirBuilder::new();
        builder.recursive(true);
        if shared {
            builder.mode(SHARED_DIR_MODE);
        }
        builder.create(dir)?;
        if shared {
            // Another user may have created it first
            let _ = fs::set_permissions(dir, Permissions::from_mode(SHARED_DIR_MODE));
        }
        Ok(())
    }

    pub(super) fn shared_file_mode(options: &mut OpenOptions, shared: bool) {
        if shared {
            options.mode(SHARED_FILE_MODE);
        }
    }

    /// Only the owner may change the mode, so failures are expected and ignored.
    pub(super) fn widen_file(file: &File) {
        let Ok(metadata) = file.metadata() else {
            return;
        };
        if metadata.permissions().mode() & 0o777 != SHARED_FILE_MODE {
            let _ = file.set_permissions(Permissions::from_mode(SHARED_FILE_MODE));
        }
    }

    /// `Ok(None)` when another open file description holds the lock.
    pub(super) fn try_lock(file: File) -> io::Result<Option<LockHandle>> {
        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => Ok(Some(lock)),
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => Ok(None),
            Err((_, errno)) => Err(io::Error::from(errno)),
        }
    }
}

#[cfg(not(unix))]
mod os {
    use camino::Utf8Path;
    use std::fs::{self, File, OpenOptions, TryLockError};
    use std::io;

    pub(super) type LockHandle = File;

    pub(super) fn create_lock_dir(dir: &Utf8Path, _shared: bool) -> io::Result<()> {
        fs::create_dir_all(dir)
    }

    pub(super) fn shared_file_mode(_options: &mut OpenOptions, _shared: bool) {}

    pub(super) fn widen_file(_file: &File) {}

    pub(super) fn try_lock(file: File) -> io::Result<Option<LockHandle>> {
        match file.try_lock() {
            Ok(()) => Ok(Some(file)),
            Err(TryLockError::WouldBlock) => Ok(None),
            Err(TryLockError::Error(e)) => Err(e),
        }
    }
}
