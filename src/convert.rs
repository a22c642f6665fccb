use std::ffi::OsString;
use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::error::StageError;
use crate::product::Product;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Characters wrapped around the artifact path on the converter's last
/// output line: `'<path>'...`.
const LEADING_TRIM: usize = 1;
const TRAILING_TRIM: usize = 4;

/// Turns a selected product into a raster artifact inside `output_dir`.
pub trait Converter {
    fn convert(&self, product: &Product, output_dir: &Path) -> Result<PathBuf, StageError>;
}

/// Creates `<work_dir>/<title>`. The directory must not exist yet.
pub fn prepare_output_dir(work_dir: &Path, product: &Product) -> Result<PathBuf, StageError> {
    let path = work_dir.join(&product.title);
    if !is_single_component(&product.title) {
        let source = io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("product title '{}' is not a plain directory name", product.title),
        );
        error!(path = %path.display(), error = %source, "Refusing output directory");
        return Err(StageError::DirectoryCreate { path, source });
    }

    match fs::create_dir(&path) {
        Ok(()) => {
            debug!(path = %path.display(), "Created output directory");
            Ok(path)
        }
        Err(source) => {
            error!(path = %path.display(), error = %source, "Failed to create output directory");
            Err(StageError::DirectoryCreate { path, source })
        }
    }
}

fn is_single_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Extracts the artifact path from the converter's stdout: the last token of
/// the last non-empty line, minus one leading and four trailing characters.
pub fn parse_artifact_path(stdout: &str) -> Option<PathBuf> {
    let line = stdout.lines().rev().find(|line| !line.trim().is_empty())?;
    let token = line.split_whitespace().last()?;
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= LEADING_TRIM + TRAILING_TRIM {
        return None;
    }
    let path: String = chars[LEADING_TRIM..chars.len() - TRAILING_TRIM]
        .iter()
        .collect();
    Some(PathBuf::from(path))
}

#[derive(Debug, Clone)]
pub struct ConverterSettings {
    pub program: PathBuf,
    pub format: String,
    pub width: u32,
    pub style_file: PathBuf,
    pub timeout: Duration,
}

/// Runs the external conversion tool as a child process.
#[derive(Debug, Clone)]
pub struct ProcessConverter {
    settings: ConverterSettings,
}

impl ProcessConverter {
    pub fn new(settings: ConverterSettings) -> Self {
        Self { settings }
    }

    pub fn command_args(&self, product: &Product, output_dir: &Path) -> Vec<OsString> {
        vec![
            "-f".into(),
            self.settings.format.clone().into(),
            "-W".into(),
            self.settings.width.to_string().into(),
            "-p".into(),
            self.settings.style_file.clone().into_os_string(),
            "-o".into(),
            output_dir.as_os_str().to_os_string(),
            product.identifier.clone().into(),
        ]
    }
}

impl Converter for ProcessConverter {
    fn convert(&self, product: &Product, output_dir: &Path) -> Result<PathBuf, StageError> {
        let args = self.command_args(product, output_dir);
        info!(
            program = %self.settings.program.display(),
            product = product.identifier.as_str(),
            "Launching converter"
        );

        let mut command = Command::new(&self.settings.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let child = command
            .spawn()
            .map_err(|err| {
                StageError::Conversion(format!(
                    "failed to launch {}: {err}",
                    self.settings.program.display()
                ))
            })?;

        let output = wait_with_timeout(child, self.settings.timeout)?;
        info!(stdout = output.stdout.as_str(), "Converter stdout");
        if !output.stderr.trim().is_empty() {
            info!(stderr = output.stderr.as_str(), "Converter stderr");
        }

        if !output.status.success() {
            return Err(StageError::Conversion(format!(
                "{} exited with {}",
                self.settings.program.display(),
                output.status
            )));
        }

        let artifact = parse_artifact_path(&output.stdout).ok_or_else(|| {
            StageError::Conversion("artifact path not found on last output line".to_string())
        })?;
        let (width, height) = inspect_artifact(&artifact)?;
        info!(
            artifact = %artifact.display(),
            width,
            height,
            "Converter produced artifact"
        );
        Ok(artifact)
    }
}

/// Reads the artifact's image header and returns its dimensions.
pub fn inspect_artifact(path: &Path) -> Result<(u32, u32), StageError> {
    image::image_dimensions(path).map_err(|err| {
        StageError::Conversion(format!(
            "artifact {} is not a readable image: {err}",
            path.display()
        ))
    })
}

struct ProcessOutput {
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

enum Stream {
    Stdout,
    Stderr,
}

/// Waits for the converter and for its output pipes, both bounded by the
/// same deadline. Grandchildren that keep the pipes open count as a hang.
fn wait_with_timeout(mut child: Child, timeout: Duration) -> Result<ProcessOutput, StageError> {
    let deadline = Instant::now() + timeout;
    let (tx, rx) = mpsc::channel();
    if let Some(pipe) = child.stdout.take() {
        spawn_reader(Stream::Stdout, pipe, tx.clone());
    }
    if let Some(pipe) = child.stderr.take() {
        spawn_reader(Stream::Stderr, pipe, tx.clone());
    }
    drop(tx);

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if Instant::now() >= deadline {
                    warn!(timeout_s = timeout.as_secs_f64(), "Converter timed out, killing");
                    kill_process_tree(&mut child);
                    return Err(StageError::Conversion(format!(
                        "converter did not finish within {timeout:?}"
                    )));
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(err) => {
                kill_process_tree(&mut child);
                return Err(StageError::Conversion(format!(
                    "failed to poll converter: {err}"
                )));
            }
        }
    };

    let mut stdout = String::new();
    let mut stderr = String::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok((Stream::Stdout, text)) => stdout = text,
            Ok((Stream::Stderr, text)) => stderr = text,
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    timeout_s = timeout.as_secs_f64(),
                    "Converter exited but its output is still held open, killing"
                );
                kill_process_tree(&mut child);
                return Err(StageError::Conversion(format!(
                    "converter did not finish within {timeout:?}: output still held open by a descendant"
                )));
            }
        }
    }
    // Stragglers detached from the pipes would keep writing into the work dir.
    kill_process_group(&child);

    Ok(ProcessOutput {
        status,
        stdout,
        stderr,
    })
}

fn spawn_reader<R: Read + Send + 'static>(
    stream: Stream,
    mut pipe: R,
    tx: mpsc::Sender<(Stream, String)>,
) {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        let _ = tx.send((stream, String::from_utf8_lossy(&buf).into_owned()));
    });
}

fn kill_process_tree(child: &mut Child) {
    kill_process_group(child);
    let _ = child.kill();
    let _ = child.wait();
}

/// The converter runs as the leader of its own process group, so the group
/// id is its pid.
#[cfg(unix)]
fn kill_process_group(child: &Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(pid) = i32::try_from(child.id()) else {
        return;
    };
    match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) => debug!(pgid = pid, "Killed converter process group"),
        Err(nix::errno::Errno::ESRCH) => {}
        Err(err) => warn!(pgid = pid, error = %err, "Failed to kill converter process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}
