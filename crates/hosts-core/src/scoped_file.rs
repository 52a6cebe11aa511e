use std::{
    collections::HashMap,
    fs::{self, File, Metadata, OpenOptions},
    io::{self, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use once_cell::sync::Lazy;
use tracing::{debug, warn};

use crate::HostsResult;

/// One lock per path for the whole process, shared by every `ScopedFile`.
static PATH_LOCKS: Lazy<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

const STAGING_PREFIX: &str = ".devtunnel-";

fn lock_for(path: &Path) -> Arc<Mutex<()>> {
    let key = lock_key(path);
    let mut locks = PATH_LOCKS.lock().unwrap_or_else(PoisonError::into_inner);
    locks.entry(key).or_default().clone()
}

/// Canonical path of the file, or of its directory joined with the file name
/// while the file does not exist yet.
fn lock_key(path: &Path) -> PathBuf {
    if let Ok(real) = fs::canonicalize(path) {
        return real;
    }
    match (fs::canonicalize(parent_dir(path)), path.file_name()) {
        (Ok(dir), Some(name)) => dir.join(name),
        _ => path.to_path_buf(),
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Why a rename-based replace did not happen.
#[derive(Debug)]
enum ReplaceError {
    /// The directory refuses a staging file or the rename; the original is
    /// untouched and may be rewritten in place.
    Unavailable(io::Error),
    /// Any other failure. The original is untouched and must stay that way.
    Failed(io::Error),
}

impl ReplaceError {
    fn from_setup(err: io::Error) -> Self {
        if replace_unsupported(&err) {
            Self::Unavailable(err)
        } else {
            Self::Failed(err)
        }
    }
}

/// Errors from creating or renaming the staging file that mean the location
/// only supports writing the file itself (busy bind mounts, other devices,
/// locked-down directories).
fn replace_unsupported(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::PermissionDenied
            | io::ErrorKind::ReadOnlyFilesystem
            | io::ErrorKind::ResourceBusy
            | io::ErrorKind::CrossesDevices
    )
}

/// Serialized read/replace access to a single file within this process.
///
/// A missing file reads as empty content. Writes require the file to exist and
/// replace its whole content. Other processes are not coordinated with.
#[derive(Clone, Debug)]
pub struct ScopedFile {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl ScopedFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock = lock_for(&path);
        Self { path, lock }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Full file content; empty when the file does not exist.
    pub fn read_all(&self) -> HostsResult<String> {
        let _guard = self.guard();
        self.read_locked()
    }

    /// Replace the file content with `text`, returning the number of bytes written.
    pub fn write_string(&self, text: &str) -> HostsResult<usize> {
        let _guard = self.guard();
        self.replace_locked(text)
    }

    /// Read, transform and write back under one lock acquisition.
    ///
    /// `apply` returns `None` to leave the file untouched. Returns whether a
    /// write happened.
    pub fn update<F>(&self, apply: F) -> HostsResult<bool>
    where
        F: FnOnce(&str) -> Option<String>,
    {
        let _guard = self.guard();
        let current = self.read_locked()?;
        match apply(&current) {
            Some(next) => {
                self.replace_locked(&next)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_locked(&self) -> HostsResult<String> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(text),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(err) => Err(err.into()),
        }
    }

    fn replace_locked(&self, text: &str) -> HostsResult<usize> {
        self.replace_locked_with(text, replace_with_rename)
    }

    fn replace_locked_with<R>(&self, text: &str, replace: R) -> HostsResult<usize>
    where
        R: FnOnce(&Path, &str, &Metadata) -> Result<(), ReplaceError>,
    {
        let metadata = fs::symlink_metadata(&self.path)?;
        if metadata.file_type().is_symlink() {
            // Renaming would replace the link itself.
            return self.rewrite_in_place(text);
        }
        match replace(&self.path, text, &metadata) {
            Ok(()) => {
                debug!(path = %self.path.display(), bytes = text.len(), "file replaced");
                Ok(text.len())
            }
            Err(ReplaceError::Unavailable(err)) => {
                warn!(path = %self.path.display(), error = %err, "atomic replace unavailable; rewriting in place");
                self.rewrite_in_place(text)
            }
            Err(ReplaceError::Failed(err)) => {
                warn!(path = %self.path.display(), error = %err, "replace failed; file left unchanged");
                Err(err.into())
            }
        }
    }

    fn rewrite_in_place(&self, text: &str) -> HostsResult<usize> {
        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        file.seek(SeekFrom::Start(0))?;
        file.set_len(0)?;
        file.write_all(text.as_bytes())?;
        file.sync_all()?;
        Ok(text.len())
    }
}

fn replace_with_rename(path: &Path, text: &str, metadata: &Metadata) -> Result<(), ReplaceError> {
    replace_with_rename_using(path, text, metadata, |file, text, metadata| {
        file.write_all(text.as_bytes())?;
        file.set_permissions(metadata.permissions())?;
        file.sync_all()
    })
}

/// Stage `text` in a sibling temp file and rename it over `path`.
///
/// The staging file is removed on every error path.
fn replace_with_rename_using<S>(path: &Path, text: &str, metadata: &Metadata, stage: S) -> Result<(), ReplaceError>
where
    S: FnOnce(&mut File, &str, &Metadata) -> io::Result<()>,
{
    let mut staged = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempfile_in(parent_dir(path))
        .map_err(ReplaceError::from_setup)?;
    stage(staged.as_file_mut(), text, metadata).map_err(ReplaceError::Failed)?;
    staged
        .persist(path)
        .map_err(|err| ReplaceError::from_setup(err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = ScopedFile::new(dir.path().join("absent"));
        assert_eq!(file.read_all().unwrap(), "");
    }

    #[test]
    fn write_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = ScopedFile::new(dir.path().join("absent"));
        let err = file.write_string("data").unwrap_err();
        match err {
            crate::HostsError::Io(source) => assert_eq!(source.kind(), io::ErrorKind::NotFound),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!dir.path().join("absent").exists());
    }

    #[test]
    fn write_replaces_whole_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts");
        fs::write(&path, "a much longer original line\n").unwrap();
        let file = ScopedFile::new(&path);
        assert_eq!(file.write_string("short\n").unwrap(), 6);
        assert_eq!(fs::read_to_string(&path).unwrap(), "short\n");
    }

    #[cfg(unix)]
    #[test]
    fn write_keeps_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts");
        fs::write(&path, "x\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        ScopedFile::new(&path).write_string("y\n").unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
    }

    #[cfg(unix)]
    #[test]
    fn write_through_symlink_keeps_link() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("real-hosts");
        let link = dir.path().join("hosts");
        fs::write(&target, "old\n").unwrap();
        std::os::unix::fs::symlink(&target, &link).unwrap();
        ScopedFile::new(&link).write_string("new\n").unwrap();
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_to_string(&target).unwrap(), "new\n");
    }

    #[test]
    fn update_skips_write_when_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts");
        fs::write(&path, "keep\n").unwrap();
        let file = ScopedFile::new(&path);
        assert!(!file.update(|_| None).unwrap());
        assert!(file.update(|current| Some(format!("{current}more\n"))).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "keep\nmore\n");
    }

    #[test]
    fn handles_for_same_path_share_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts");
        fs::write(&path, "").unwrap();
        let a = ScopedFile::new(&path);
        let b = ScopedFile::new(&path);
        assert!(Arc::ptr_eq(&a.lock, &b.lock));
    }

    #[test]
    fn lock_is_shared_before_the_file_exists() {
        let dir = tempfile::tempdir().unwrap();
        let early = ScopedFile::new(dir.path().join(".").join("hosts"));
        let plain = ScopedFile::new(dir.path().join("hosts"));
        assert!(Arc::ptr_eq(&early.lock, &plain.lock));

        fs::write(dir.path().join("hosts"), "").unwrap();
        let late = ScopedFile::new(dir.path().join("hosts"));
        assert!(Arc::ptr_eq(&early.lock, &late.lock));
    }

    fn staging_leftovers(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(STAGING_PREFIX))
            .collect()
    }

    #[test]
    fn staging_failure_keeps_original() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts");
        fs::write(&path, "127.0.0.1 localhost\n").unwrap();
        let file = ScopedFile::new(&path);

        let err = file
            .replace_locked_with("10.0.0.1 new.dev\n", |path, text, metadata| {
                replace_with_rename_using(path, text, metadata, |staged, text, _| {
                    staged.write_all(&text.as_bytes()[..4])?;
                    Err(io::Error::new(io::ErrorKind::StorageFull, "no space left on device"))
                })
            })
            .unwrap_err();

        match err {
            crate::HostsError::Io(source) => assert_eq!(source.kind(), io::ErrorKind::StorageFull),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(fs::read_to_string(&path).unwrap(), "127.0.0.1 localhost\n");
        assert!(staging_leftovers(dir.path()).is_empty());
    }

    #[test]
    fn unexpected_rename_error_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts");
        fs::write(&path, "keep\n").unwrap();
        let file = ScopedFile::new(&path);

        let err = file
            .replace_locked_with("gone\n", |_, _, _| {
                Err(ReplaceError::from_setup(io::Error::new(io::ErrorKind::FileTooLarge, "too large")))
            })
            .unwrap_err();

        assert!(matches!(err, crate::HostsError::Io(ref source) if source.kind() == io::ErrorKind::FileTooLarge));
        assert_eq!(fs::read_to_string(&path).unwrap(), "keep\n");
    }

    #[test]
    fn cross_device_rename_rewrites_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts");
        fs::write(&path, "a much longer original line\n").unwrap();
        let file = ScopedFile::new(&path);

        let written = file
            .replace_locked_with("short\n", |_, _, _| {
                Err(ReplaceError::from_setup(io::Error::new(
                    io::ErrorKind::CrossesDevices,
                    "invalid cross-device link",
                )))
            })
            .unwrap();

        assert_eq!(written, 6);
        assert_eq!(fs::read_to_string(&path).unwrap(), "short\n");
    }

    #[test]
    fn only_location_errors_allow_in_place_rewrite() {
        for kind in [
            io::ErrorKind::PermissionDenied,
            io::ErrorKind::ReadOnlyFilesystem,
            io::ErrorKind::ResourceBusy,
            io::ErrorKind::CrossesDevices,
        ] {
            assert!(replace_unsupported(&io::Error::from(kind)), "{kind:?}");
        }
        for kind in [
            io::ErrorKind::StorageFull,
            io::ErrorKind::FileTooLarge,
            io::ErrorKind::Interrupted,
            io::ErrorKind::Other,
        ] {
            assert!(!replace_unsupported(&io::Error::from(kind)), "{kind:?}");
        }
    }

    #[cfg(unix)]
    #[test]
    fn read_only_directory_falls_back_to_in_place() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts");
        fs::write(&path, "old\n").unwrap();
        fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o555)).unwrap();

        let result = ScopedFile::new(&path).write_string("new\n");

        fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(result.unwrap(), 4);
        assert_eq!(fs::read_to_string(&path).unwrap(), "new\n");
        assert!(staging_leftovers(dir.path()).is_empty());
    }
}
