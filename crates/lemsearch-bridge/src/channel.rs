//! Line-oriented channels to a matching engine.
//!
//! [`EngineChannel`] is the narrow surface the query bridge depends on.
//! [`PipeChannel`] implements it over any async reader/writer pair, which
//! lets an engine run in-process. [`ChildProcessChannel`] owns a spawned
//! engine process and its stdin/stdout pipes.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use lemsearch_core::config::EngineConfig;
use lemsearch_core::error::{LemError, Result};

/// A bidirectional, line-framed text channel to an engine.
pub trait EngineChannel: Send {
    /// Write `line` followed by `\n`, then flush.
    fn write_line(&mut self, line: &str) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Read one line without its terminator. `None` means end of stream.
    fn read_line(&mut self) -> impl std::future::Future<Output = Result<Option<String>>> + Send;

    /// Close the write side and release the engine.
    ///
    /// Calling `close` on an already closed channel does nothing.
    fn close(&mut self) -> impl std::future::Future<Output = Result<()>> + Send;
}

// ---------------------------------------------------------------------------
// PipeChannel
// ---------------------------------------------------------------------------

/// [`EngineChannel`] over an async writer and buffered reader.
pub struct PipeChannel<W, R> {
    writer: Option<W>,
    reader: R,
}

impl<W, R> PipeChannel<W, R>
where
    W: AsyncWrite + Unpin + Send,
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(writer: W, reader: R) -> Self {
        Self {
            writer: Some(writer),
            reader,
        }
    }

    /// Whether the write side is still open.
    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }
}

impl<W, R> EngineChannel for PipeChannel<W, R>
where
    W: AsyncWrite + Unpin + Send,
    R: AsyncBufRead + Unpin + Send,
{
    async fn write_line(&mut self, line: &str) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| LemError::ChildProcess("engine input is closed".to_string()))?;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<Option<String>> {
        let mut buf = String::new();
        if self.reader.read_line(&mut buf).await? == 0 {
            return Ok(None);
        }
        if buf.ends_with('\n') {
            buf.pop();
            if buf.ends_with('\r') {
                buf.pop();
            }
        }
        Ok(Some(buf))
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.shutdown().await {
                debug!(error = %e, "Engine input already closed");
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ChildProcessChannel
// ---------------------------------------------------------------------------

/// How to launch an engine process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl EngineCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            program: PathBuf::from(&config.command),
            args: config.args.clone(),
            working_dir: (!config.working_dir.is_empty())
                .then(|| PathBuf::from(&config.working_dir)),
        }
    }
}

/// Time a closed engine gets to exit before it is killed.
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// An engine running as a child process.
///
/// stdin and stdout are piped to the channel; stderr is inherited so engine
/// diagnostics reach the console. The child is killed if the channel is
/// dropped without being closed.
pub struct ChildProcessChannel {
    child: Child,
    pipes: PipeChannel<ChildStdin, BufReader<ChildStdout>>,
    exit: Option<ExitStatus>,
    shutdown_grace: Duration,
}

impl ChildProcessChannel {
    /// Launch the engine.
    pub fn spawn(command: &EngineCommand) -> Result<Self> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            LemError::ChildProcess(format!(
                "failed to start {}: {}",
                command.program.display(),
                e
            ))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| LemError::ChildProcess("engine stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LemError::ChildProcess("engine stdout not captured".to_string()))?;

        info!(
            program = %command.program.display(),
            pid = child.id().unwrap_or_default(),
            "Engine process started"
        );

        Ok(Self {
            child,
            pipes: PipeChannel::new(stdin, BufReader::new(stdout)),
            exit: None,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        })
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// OS process id, while the child is running.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Exit status, once the channel has been closed.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit
    }
}

impl EngineChannel for ChildProcessChannel {
    async fn write_line(&mut self, line: &str) -> Result<()> {
        self.pipes.write_line(line).await
    }

    async fn read_line(&mut self) -> Result<Option<String>> {
        self.pipes.read_line().await
    }

    async fn close(&mut self) -> Result<()> {
        if self.exit.is_some() {
            return Ok(());
        }
        self.pipes.close().await?;

        let status = match tokio::time::timeout(self.shutdown_grace, self.child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!(
                    grace_ms = self.shutdown_grace.as_millis() as u64,
                    "Engine did not exit after its input closed, killing it"
                );
                self.child.kill().await?;
                self.child.wait().await?
            }
        };
        info!(%status, "Engine process exited");
        self.exit = Some(status);
        Ok(())
    }
}
