//! The query bridge: one engine session driven by a strict
//! request/response exchange.
//!
//! ```text
//! Initializing --banner + init sentinel--> Ready --query--> Ready
//!      |                                     |
//!      +--EOF / timeout / I/O--> Failed      +--I/O / EOF / timeout--> Closed
//! ```
//!
//! The startup banner ends at a line that equals the init sentinel after
//! trimming. A response ends at the first line that merely contains the end
//! sentinel. Both rules match the existing engine binary.

use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};

use lemsearch_core::config::EngineConfig;
use lemsearch_core::error::{LemError, Result};
use lemsearch_core::types::{QueryEnvelope, SessionState};
use lemsearch_vector::codec;
use lemsearch_vector::embedding::EmbeddingService;

use crate::channel::EngineChannel;

/// Framing and timing rules for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeOptions {
    pub init_sentinel: String,
    pub end_sentinel: String,
    /// Bound on each startup line. `None` waits indefinitely.
    pub init_timeout: Option<Duration>,
    /// Bound on each response line. `None` waits indefinitely.
    pub response_timeout: Option<Duration>,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl BridgeOptions {
    /// Empty sentinels would match arbitrary lines and desynchronize the
    /// exchange.
    pub fn validate(&self) -> Result<()> {
        if self.init_sentinel.trim().is_empty() || self.end_sentinel.is_empty() {
            return Err(LemError::Config(
                "engine sentinels must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn bound(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl From<&EngineConfig> for BridgeOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            init_sentinel: config.init_sentinel.clone(),
            end_sentinel: config.end_sentinel.clone(),
            init_timeout: bound(config.init_timeout_secs),
            response_timeout: bound(config.response_timeout_secs),
        }
    }
}

/// The engine's answer to one query: every line before the end sentinel,
/// verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResult {
    pub lines: Vec<String>,
}

impl QueryResult {
    /// The response lines joined with `\n`.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl fmt::Display for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

/// Drives one engine session.
///
/// The bridge exclusively owns the channel: it is the only writer of the
/// engine's input and the only reader of its output. The channel is closed
/// exactly once, when the session reaches `Failed` or `Closed`.
pub struct QueryBridge<C: EngineChannel, E: EmbeddingService> {
    channel: C,
    embedder: E,
    options: BridgeOptions,
    state: SessionState,
    diagnostics: Vec<String>,
}

impl<C: EngineChannel, E: EmbeddingService> QueryBridge<C, E> {
    /// Wrap a freshly launched engine. The session starts `Initializing`.
    pub fn new(channel: C, embedder: E, options: BridgeOptions) -> Self {
        Self {
            channel,
            embedder,
            options,
            state: SessionState::Initializing,
            diagnostics: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Lines the engine printed before its init sentinel.
    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    /// Consume the startup banner, returning its lines.
    pub async fn initialize(&mut self) -> Result<Vec<String>> {
        self.initialize_with(|_| {}).await?;
        Ok(self.diagnostics.clone())
    }

    /// Consume the startup banner, passing each line to `on_line` as it
    /// arrives.
    ///
    /// Reaches `Ready` at the init sentinel. End of stream, a timeout or a
    /// read failure moves the session to `Failed` and closes the channel.
    /// Invalid options are reported before anything is read.
    pub async fn initialize_with<F: FnMut(&str)>(&mut self, mut on_line: F) -> Result<()> {
        if self.state != SessionState::Initializing {
            return Err(LemError::ChildProcess(format!(
                "cannot initialize a session that is {:?}",
                self.state
            )));
        }
        self.options.validate()?;

        loop {
            let line = match self.read_bounded(self.options.init_timeout).await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    let err = LemError::ChildProcess(format!(
                        "engine exited during startup after {} lines",
                        self.diagnostics.len()
                    ));
                    self.terminate(SessionState::Failed, &err).await;
                    return Err(err);
                }
                Err(err) => {
                    self.terminate(SessionState::Failed, &err).await;
                    return Err(err);
                }
            };

            if line.trim() == self.options.init_sentinel {
                self.state = SessionState::Ready;
                info!(diagnostics = self.diagnostics.len(), "Engine ready");
                return Ok(());
            }
            on_line(&line);
            self.diagnostics.push(line);
        }
    }

    /// Embed `text`, send it to the engine, and collect the response.
    ///
    /// An embedder failure leaves the session `Ready`. Any failure talking to
    /// the engine closes the session.
    pub async fn query(&mut self, text: &str) -> Result<QueryResult> {
        if self.state != SessionState::Ready {
            return Err(LemError::ChildProcess(format!(
                "session is {:?}, not accepting queries",
                self.state
            )));
        }

        let embedding = codec::normalize(&self.embedder.embed(text).await?);
        let envelope = QueryEnvelope {
            input_text: text.to_string(),
            embedding: codec::encode_csv(&embedding),
        };
        let line = envelope.to_line()?;

        match self.exchange(&line).await {
            Ok(lines) => {
                debug!(lines = lines.len(), "Query answered");
                Ok(QueryResult { lines })
            }
            Err(err) => {
                self.terminate(SessionState::Closed, &err).await;
                Err(err)
            }
        }
    }

    /// End the session. Does nothing if it has already ended.
    pub async fn close(&mut self) -> Result<()> {
        if self.state.is_terminal() {
            return Ok(());
        }
        self.state = SessionState::Closed;
        self.channel.close().await
    }

    async fn exchange(&mut self, line: &str) -> Result<Vec<String>> {
        self.channel
            .write_line(line)
            .await
            .map_err(|e| pipe_fault("writing query", e))?;

        let mut lines = Vec::new();
        loop {
            match self.read_bounded(self.options.response_timeout).await {
                Ok(Some(line)) if line.contains(&self.options.end_sentinel) => return Ok(lines),
                Ok(Some(line)) => lines.push(line),
                Ok(None) => {
                    return Err(LemError::ChildProcess(format!(
                        "engine closed its output after {} response lines",
                        lines.len()
                    )))
                }
                Err(e) => return Err(pipe_fault("reading response", e)),
            }
        }
    }

    async fn read_bounded(&mut self, limit: Option<Duration>) -> Result<Option<String>> {
        match limit {
            Some(limit) => tokio::time::timeout(limit, self.channel.read_line())
                .await
                .map_err(|_| LemError::Timeout {
                    secs: limit.as_secs(),
                })?,
            None => self.channel.read_line().await,
        }
    }

    async fn terminate(&mut self, next: SessionState, cause: &LemError) {
        warn!(error = %cause, state = ?next, "Ending engine session");
        self.state = next;
        if let Err(e) = self.channel.close().await {
            warn!(error = %e, "Failed to close engine channel");
        }
    }
}

fn pipe_fault(action: &str, err: LemError) -> LemError {
    match err {
        LemError::Io(e) => LemError::ChildProcess(format!("{}: {}", action, e)),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::PipeChannel;
    use lemsearch_vector::embedding::MockEmbedding;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{
        AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf,
    };

    type TestChannel = PipeChannel<WriteHalf<DuplexStream>, BufReader<ReadHalf<DuplexStream>>>;

    /// Records how often `close` reached the underlying channel.
    struct CountingChannel {
        inner: TestChannel,
        closes: Arc<AtomicUsize>,
    }

    impl EngineChannel for CountingChannel {
        async fn write_line(&mut self, line: &str) -> Result<()> {
            self.inner.write_line(line).await
        }

        async fn read_line(&mut self) -> Result<Option<String>> {
            self.inner.read_line().await
        }

        async fn close(&mut self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.inner.close().await
        }
    }

    /// Channel plus the engine's ends of the pipes.
    fn pipes() -> (
        CountingChannel,
        Arc<AtomicUsize>,
        BufReader<ReadHalf<DuplexStream>>,
        WriteHalf<DuplexStream>,
    ) {
        let (bridge_side, engine_side) = tokio::io::duplex(64 * 1024);
        let (bridge_read, bridge_write) = tokio::io::split(bridge_side);
        let (engine_read, engine_write) = tokio::io::split(engine_side);
        let closes = Arc::new(AtomicUsize::new(0));
        let channel = CountingChannel {
            inner: PipeChannel::new(bridge_write, BufReader::new(bridge_read)),
            closes: Arc::clone(&closes),
        };
        (channel, closes, BufReader::new(engine_read), engine_write)
    }

    /// In-process engine: prints a banner, then answers every query with
    /// `result-for:<input_text>` and the end sentinel.
    fn spawn_echo_engine(
        mut input: BufReader<ReadHalf<DuplexStream>>,
        mut output: WriteHalf<DuplexStream>,
    ) -> tokio::task::JoinHandle<Vec<String>> {
        tokio::spawn(async move {
            output
                .write_all(b"booting\n###INITEND###\n")
                .await
                .unwrap();
            let mut received = Vec::new();
            let mut line = String::new();
            while input.read_line(&mut line).await.unwrap() > 0 {
                let envelope: QueryEnvelope = serde_json::from_str(line.trim_end()).unwrap();
                let reply = format!("result-for:{}\n###END###\n", envelope.input_text);
                output.write_all(reply.as_bytes()).await.unwrap();
                received.push(line.trim_end().to_string());
                line.clear();
            }
            received
        })
    }

    fn bridge(channel: CountingChannel) -> QueryBridge<CountingChannel, MockEmbedding> {
        QueryBridge::new(
            channel,
            MockEmbedding::with_dimensions(8),
            BridgeOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_startup_banner_is_surfaced() {
        let (channel, _closes, input, output) = pipes();
        let _engine = spawn_echo_engine(input, output);
        let mut bridge = bridge(channel);
        assert_eq!(bridge.state(), SessionState::Initializing);

        let diagnostics = bridge.initialize().await.unwrap();
        assert_eq!(diagnostics, vec!["booting".to_string()]);
        assert_eq!(bridge.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_init_sentinel_tolerates_surrounding_whitespace() {
        let (channel, _closes, _input, mut output) = pipes();
        output.write_all(b"a\n  ###INITEND###  \r\n").await.unwrap();
        let mut bridge = bridge(channel);

        let mut seen = Vec::new();
        bridge
            .initialize_with(|line| seen.push(line.to_string()))
            .await
            .unwrap();
        assert_eq!(seen, vec!["a".to_string()]);
        assert_eq!(bridge.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_init_sentinel_must_be_the_whole_line() {
        let (channel, _closes, _input, mut output) = pipes();
        output
            .write_all(b"loading ###INITEND### soon\n")
            .await
            .unwrap();
        output.shutdown().await.unwrap();
        let mut bridge = bridge(channel);

        assert!(bridge.initialize().await.is_err());
        assert_eq!(bridge.state(), SessionState::Failed);
        assert_eq!(bridge.diagnostics(), ["loading ###INITEND### soon"]);
    }

    #[tokio::test]
    async fn test_query_round_trip() {
        let (channel, closes, input, output) = pipes();
        let engine = spawn_echo_engine(input, output);
        let mut bridge = bridge(channel);
        bridge.initialize().await.unwrap();

        let result = bridge.query("cat").await.unwrap();
        assert_eq!(result.text(), "result-for:cat");
        assert_eq!(result.to_string(), "result-for:cat");
        assert_eq!(bridge.state(), SessionState::Ready);

        let second = bridge.query("big dog").await.unwrap();
        assert_eq!(second.lines, vec!["result-for:big dog".to_string()]);

        bridge.close().await.unwrap();
        bridge.close().await.unwrap();
        assert_eq!(bridge.state(), SessionState::Closed);
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        let received = engine.await.unwrap();
        assert_eq!(received.len(), 2);
        let envelope: QueryEnvelope = serde_json::from_str(&received[0]).unwrap();
        assert_eq!(envelope.input_text, "cat");
        let vector = codec::decode_csv_dim(&envelope.embedding, 8).unwrap();
        assert!((codec::l2_norm(&vector) - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_end_sentinel_matches_as_substring() {
        let (channel, _closes, mut input, mut output) = pipes();
        output.write_all(b"###INITEND###\n").await.unwrap();
        let mut bridge = bridge(channel);
        bridge.initialize().await.unwrap();

        let engine = tokio::spawn(async move {
            let mut line = String::new();
            input.read_line(&mut line).await.unwrap();
            output
                .write_all(b"[\n  {\"title\": \"cat\"}\n]\n\n-- ###END### --\n")
                .await
                .unwrap();
            (input, output)
        });

        let result = bridge.query("cat").await.unwrap();
        assert_eq!(result.lines, vec!["[", "  {\"title\": \"cat\"}", "]", ""]);
        let _ends = engine.await.unwrap();
    }

    #[tokio::test]
    async fn test_engine_crash_during_startup_fails_session() {
        let (channel, closes, input, mut output) = pipes();
        output.write_all(b"loading index\n").await.unwrap();
        drop(input);
        output.shutdown().await.unwrap();

        let mut bridge = bridge(channel);
        let err = bridge.initialize().await.unwrap_err();
        assert!(matches!(err, LemError::ChildProcess(_)));
        assert_eq!(bridge.state(), SessionState::Failed);
        assert_eq!(bridge.diagnostics(), ["loading index"]);
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        assert!(bridge.query("cat").await.is_err());
        bridge.close().await.unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_engine_eof_mid_response_closes_session() {
        let (channel, closes, mut input, mut output) = pipes();
        output.write_all(b"###INITEND###\n").await.unwrap();
        let mut bridge = bridge(channel);
        bridge.initialize().await.unwrap();

        let engine = tokio::spawn(async move {
            let mut line = String::new();
            input.read_line(&mut line).await.unwrap();
            output.write_all(b"partial\n").await.unwrap();
            output.shutdown().await.unwrap();
            input
        });

        let err = bridge.query("cat").await.unwrap_err();
        assert!(matches!(err, LemError::ChildProcess(_)));
        assert!(err.is_session_fatal());
        assert_eq!(bridge.state(), SessionState::Closed);
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        let second = bridge.query("dog").await.unwrap_err();
        assert!(second.to_string().contains("Closed"));
        let _input = engine.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_engine_times_out() {
        let (channel, closes, _input, mut output) = pipes();
        output.write_all(b"###INITEND###\n").await.unwrap();
        let options = BridgeOptions {
            response_timeout: Some(Duration::from_secs(2)),
            ..BridgeOptions::default()
        };
        let mut bridge = QueryBridge::new(channel, MockEmbedding::with_dimensions(8), options);
        bridge.initialize().await.unwrap();

        let err = bridge.query("cat").await.unwrap_err();
        assert!(matches!(err, LemError::Timeout { secs: 2 }));
        assert_eq!(bridge.state(), SessionState::Closed);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_embedder_failure_keeps_session_ready() {
        let (channel, closes, input, output) = pipes();
        let _engine = spawn_echo_engine(input, output);
        let mut bridge = bridge(channel);
        bridge.initialize().await.unwrap();

        let err = bridge.query("").await.unwrap_err();
        assert!(matches!(err, LemError::Embedder(_)));
        assert_eq!(bridge.state(), SessionState::Ready);
        assert_eq!(closes.load(Ordering::SeqCst), 0);

        assert_eq!(bridge.query("owl").await.unwrap().text(), "result-for:owl");
    }

    #[tokio::test]
    async fn test_query_before_ready_is_rejected() {
        let (channel, closes, _input, _output) = pipes();
        let mut bridge = bridge(channel);
        let err = bridge.query("cat").await.unwrap_err();
        assert!(matches!(err, LemError::ChildProcess(_)));
        assert_eq!(bridge.state(), SessionState::Initializing);
        assert_eq!(closes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_sentinels_are_rejected() {
        let (channel, closes, _input, mut output) = pipes();
        output.write_all(b"\n###INITEND###\n").await.unwrap();
        let options = BridgeOptions {
            end_sentinel: String::new(),
            ..BridgeOptions::default()
        };
        let mut bridge = QueryBridge::new(channel, MockEmbedding::with_dimensions(8), options);

        let err = bridge.initialize().await.unwrap_err();
        assert!(matches!(err, LemError::Config(_)));
        assert_eq!(bridge.state(), SessionState::Initializing);
        assert!(bridge.diagnostics().is_empty());

        bridge.close().await.unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        let blank_init = BridgeOptions {
            init_sentinel: " ".to_string(),
            ..BridgeOptions::default()
        };
        assert!(blank_init.validate().is_err());
        assert!(BridgeOptions::default().validate().is_ok());
    }

    #[tokio::test]
    async fn test_write_failure_closes_session() {
        let (channel, closes, input, mut output) = pipes();
        output.write_all(b"###INITEND###\n").await.unwrap();
        let mut bridge = bridge(channel);
        bridge.initialize().await.unwrap();

        drop(input);
        drop(output);

        let err = bridge.query("cat").await.unwrap_err();
        assert!(matches!(err, LemError::ChildProcess(_)));
        assert!(err.to_string().contains("writing query"), "{}", err);
        assert_eq!(bridge.state(), SessionState::Closed);
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        bridge.close().await.unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_options_from_config() {
        let mut config = EngineConfig::default();
        config.init_timeout_secs = 0;
        config.response_timeout_secs = 15;
        config.end_sentinel = "<<END>>".to_string();

        let options = BridgeOptions::from(&config);
        assert_eq!(options.init_timeout, None);
        assert_eq!(options.response_timeout, Some(Duration::from_secs(15)));
        assert_eq!(options.end_sentinel, "<<END>>");
        assert_eq!(options.init_sentinel, "###INITEND###");
    }
}
