use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::DB_FILENAME;
use crate::error::{Result, TarxError};

/// Moves containers and the index between the local cache and a backend.
pub trait Transfer: Send + Sync {
    /// Push `local` to the backend; remove the local copy unless `keep`.
    fn put(&self, local: &Path, keep: bool) -> Result<()>;

    /// Fetch the backend copy of `local`'s file name into `local`.
    fn get(&self, local: &Path) -> Result<()>;

    fn describe(&self) -> String;
}

/// Backend `none`: containers stay in the cache.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalOnly;

impl Transfer for LocalOnly {
    fn put(&self, local: &Path, _keep: bool) -> Result<()> {
        let is_index = local.file_name().is_some_and(|n| n == DB_FILENAME);
        if is_index {
            return Ok(());
        }
        let mut perms = fs::metadata(local)?.permissions();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            perms.set_mode(perms.mode() & !0o222);
        }
        #[cfg(not(unix))]
        perms.set_readonly(true);
        fs::set_permissions(local, perms)?;
        debug!("kept {} locally (read-only)", local.display());
        Ok(())
    }

    fn get(&self, local: &Path) -> Result<()> {
        if local.is_file() {
            return Ok(());
        }
        Err(TarxError::Transfer(format!(
            "{} is not available locally and no backend is configured",
            local.display()
        )))
    }

    fn describe(&self) -> String {
        "none".to_string()
    }
}

/// How often a container fetch is attempted.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Additional attempts after the first.
    pub retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 1,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Run `f` until it succeeds or attempts run out.
    pub fn run<T>(&self, op_name: &str, mut f: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            match f() {
                Ok(v) => return Ok(v),
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    warn!(
                        "{op_name} failed (attempt {attempt}/{}), retrying: {e}",
                        self.retries + 1
                    );
                    if !self.delay.is_zero() {
                        thread::sleep(self.delay);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn local_put_makes_containers_read_only_but_not_the_index() {
        let tmp = tempfile::tempdir().unwrap();
        let tar = tmp.path().join("000000.tar");
        let db = tmp.path().join(DB_FILENAME);
        fs::write(&tar, b"x").unwrap();
        fs::write(&db, b"x").unwrap();
        LocalOnly.put(&tar, false).unwrap();
        LocalOnly.put(&db, false).unwrap();
        assert!(tar.exists());
        assert!(fs::metadata(&tar).unwrap().permissions().readonly());
        assert!(!fs::metadata(&db).unwrap().permissions().readonly());
    }

    #[test]
    fn local_get_requires_the_file() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(LocalOnly.get(&tmp.path().join("000001.tar")).is_err());
    }

    #[test]
    fn retry_policy_gives_up_after_retries() {
        let calls = Cell::new(0);
        let policy = RetryPolicy {
            retries: 2,
            delay: Duration::ZERO,
        };
        let res: Result<()> = policy.run("fetch", || {
            calls.set(calls.get() + 1);
            Err(TarxError::Transfer("down".into()))
        });
        assert!(res.is_err());
        assert_eq!(calls.get(), 3);

        calls.set(0);
        let ok = policy.run("fetch", || {
            calls.set(calls.get() + 1);
            if calls.get() < 2 {
                Err(TarxError::Transfer("flaky".into()))
            } else {
                Ok(7)
            }
        });
        assert_eq!(ok.unwrap(), 7);
    }
}
