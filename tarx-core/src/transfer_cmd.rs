use std::fs;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::{Result, TarxError};
use crate::transfer::Transfer;

pub const DEFAULT_PUT: &str = r#"hsi -q "cd {dest}; put {name}""#;
pub const DEFAULT_GET: &str = r#"hsi -q "cd {dest}; get {name}""#;

/// Transfer through an external command run with `sh -c` in the file's
/// directory. `{dest}` expands to the backend location and `{name}` to the
/// file name.
#[derive(Clone, Debug)]
pub struct CommandTransfer {
    pub dest: String,
    pub put_template: String,
    pub get_template: String,
    pub timeout: Option<Duration>,
}

impl CommandTransfer {
    pub fn new(dest: impl Into<String>) -> Self {
        Self {
            dest: dest.into(),
            put_template: DEFAULT_PUT.to_string(),
            get_template: DEFAULT_GET.to_string(),
            timeout: None,
        }
    }

    fn render(&self, template: &str, name: &str) -> String {
        template.replace("{dest}", &self.dest).replace("{name}", name)
    }

    fn run(&self, template: &str, local: &Path) -> Result<()> {
        let dir = match local.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| TarxError::Transfer(format!("no file name in {}", local.display())))?;
        let script = self.render(template, &name);
        debug!("running `{script}` in {}", dir.display());

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&script).current_dir(dir);
        let output = match self.timeout {
            Some(t) => run_with_timeout(&mut cmd, t),
            None => cmd.output(),
        }
        .map_err(|e| TarxError::Transfer(format!("`{script}`: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TarxError::Transfer(format!(
                "`{script}` exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

impl Transfer for CommandTransfer {
    fn put(&self, local: &Path, keep: bool) -> Result<()> {
        info!("Transferring file to {}: {}", self.dest, local.display());
        self.run(&self.put_template, local)?;
        if !keep {
            fs::remove_file(local)?;
        }
        Ok(())
    }

    fn get(&self, local: &Path) -> Result<()> {
        if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        info!("Transferring from {}: {}", self.dest, local.display());
        self.run(&self.get_template, local)
    }

    fn describe(&self) -> String {
        self.dest.clone()
    }
}

/// Spawn `cmd` with piped output, polling until it exits or `timeout`
/// elapses; a late child is killed. Both pipes are drained while polling so
/// a chatty command cannot stall on a full pipe.
fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> std::io::Result<Output> {
    let mut child = cmd.stdout(Stdio::piped()).stderr(Stdio::piped()).spawn()?;
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());
    let deadline = Instant::now() + timeout;
    let poll = Duration::from_millis(100);
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Output {
                status,
                stdout: stdout.join().unwrap_or_default(),
                stderr: stderr.join().unwrap_or_default(),
            });
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("timed out after {} seconds", timeout.as_secs()),
            ));
        }
        std::thread::sleep(poll);
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut r) = pipe {
            r.read_to_end(&mut buf).ok();
        }
        buf
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn copying(remote: &Path) -> CommandTransfer {
        CommandTransfer {
            dest: remote.display().to_string(),
            put_template: "cp {name} {dest}/{name}".into(),
            get_template: "cp {dest}/{name} {name}".into(),
            timeout: Some(Duration::from_secs(10)),
        }
    }

    #[test]
    fn placeholders_are_expanded() {
        let t = CommandTransfer::new("/tape/run1");
        assert_eq!(
            t.render(DEFAULT_PUT, "000001.tar"),
            r#"hsi -q "cd /tape/run1; put 000001.tar""#
        );
    }

    #[test]
    fn put_then_get_through_a_shell_command() {
        let tmp = tempfile::tempdir().unwrap();
        let remote = tmp.path().join("remote");
        let cache = tmp.path().join("cache");
        fs::create_dir_all(&remote).unwrap();
        fs::create_dir_all(&cache).unwrap();
        let local = cache.join("000000.tar");
        fs::write(&local, b"payload").unwrap();

        let t = copying(&remote);
        t.put(&local, false).unwrap();
        assert!(!local.exists());
        assert!(remote.join("000000.tar").exists());

        let fresh = tmp.path().join("other/cache/000000.tar");
        t.get(&fresh).unwrap();
        assert_eq!(fs::read(&fresh).unwrap(), b"payload");
    }

    #[test]
    fn failing_command_is_a_transfer_error() {
        let tmp = tempfile::tempdir().unwrap();
        let local = tmp.path().join("000000.tar");
        fs::write(&local, b"x").unwrap();
        let mut t = CommandTransfer::new("/nowhere");
        t.put_template = "exit 3".into();
        assert!(matches!(t.put(&local, true), Err(TarxError::Transfer(_))));
        assert!(local.exists());
    }

    #[test]
    fn large_output_does_not_stall_the_command() {
        let tmp = tempfile::tempdir().unwrap();
        let local = tmp.path().join("000000.tar");
        fs::write(&local, b"x").unwrap();
        let mut t = CommandTransfer::new("/nowhere");
        t.put_template = "head -c 300000 /dev/zero; head -c 300000 /dev/zero >&2".into();
        t.timeout = Some(Duration::from_secs(10));
        t.put(&local, true).unwrap();
    }

    #[test]
    fn slow_command_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        let mut t = CommandTransfer::new("/nowhere");
        t.get_template = "sleep 5".into();
        t.timeout = Some(Duration::from_millis(200));
        let err = t.get(&tmp.path().join("000000.tar")).unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
