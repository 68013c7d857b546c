use crate::error::{FuzzError, Result};
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

const RUN_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Interpreter,
    Jit,
}

impl RunMode {
    fn jvm_args(self) -> &'static [&'static str] {
        match self {
            RunMode::Interpreter => &["-Xint"],
            RunMode::Jit => &["-XX:+PrintCompilation", "-XX:-TieredCompilation"],
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub mode: RunMode,
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
    pub wall_time: Duration,
}

/// Launches the target runtime in a subprocess, capturing its output and enforcing a hard
/// wall-clock timeout via a force-kill.
pub struct RuntimeRunner {
    java_bin: String,
}

impl RuntimeRunner {
    pub fn new(jdk_home: Option<&str>) -> Self {
        let java_bin = match jdk_home {
            Some(home) => format!("{}/bin/java", home.trim_end_matches('/')),
            None => "java".to_string(),
        };
        Self { java_bin }
    }

    pub fn run(&self, class_path: &str, entry_class: &str, mode: RunMode) -> Result<RunOutcome> {
        let mut command = Command::new(&self.java_bin);
        command
            .args(mode.jvm_args())
            .arg("-cp")
            .arg(class_path)
            .arg(entry_class)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let started = Instant::now();
        let mut child = command.spawn().map_err(|e| {
            FuzzError::ProcessError(format!("failed to launch {}: {e}", self.java_bin))
        })?;

        let mut stdout_pipe = child.stdout.take().expect("piped stdout");
        let mut stderr_pipe = child.stderr.take().expect("piped stderr");

        let (stdout_tx, stdout_rx) = mpsc::channel();
        let (stderr_tx, stderr_rx) = mpsc::channel();
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stdout_pipe.read_to_end(&mut buf);
            let _ = stdout_tx.send(buf);
        });
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stderr_pipe.read_to_end(&mut buf);
            let _ = stderr_tx.send(buf);
        });

        let mut timed_out = false;
        let exit_status = loop {
            match child.try_wait()? {
                Some(status) => break Some(status),
                None => {
                    if started.elapsed() >= RUN_TIMEOUT {
                        let _ = child.kill();
                        let _ = child.wait();
                        timed_out = true;
                        break None;
                    }
                    std::thread::sleep(Duration::from_millis(20));
                }
            }
        };

        let stdout = stdout_rx.recv_timeout(Duration::from_secs(2)).unwrap_or_default();
        let stderr = stderr_rx.recv_timeout(Duration::from_secs(2)).unwrap_or_default();

        Ok(RunOutcome {
            mode,
            exit_code: exit_status.and_then(|s| s.code()),
            stdout,
            stderr,
            timed_out,
            wall_time: started.elapsed(),
        })
    }
}

pub fn class_name_from_path(source_path: &Path) -> Option<String> {
    source_path.file_stem()?.to_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jvm_args_differ_between_modes() {
        assert_ne!(RunMode::Interpreter.jvm_args(), RunMode::Jit.jvm_args());
    }

    #[test]
    fn class_name_strips_extension() {
        let path = Path::new("/tmp/testcases/tc_1/tc_1.source");
        assert_eq!(class_name_from_path(path).as_deref(), Some("tc_1"));
    }
}
