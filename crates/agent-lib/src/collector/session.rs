//! Persistent in-container probe session
//!
//! A session is one long-lived shell inside the container. Every run writes
//! the probe command followed by an end marker to the shell's input and reads
//! its output up to that marker, so one exec instance serves the app for its
//! whole lifetime.

use crate::error::CollectError;
use std::fmt;
use std::pin::Pin;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_stream::{Stream, StreamExt};

/// Line the shell echoes after every probe command
pub const END_MARKER: &str = "__agent_probe_end__";

/// Write half of a session: the shell's standard input
pub type ProbeInput = Pin<Box<dyn AsyncWrite + Send>>;

/// Read half of a session: chunks of the shell's standard output
pub type ProbeOutput = Pin<Box<dyn Stream<Item = Result<Vec<u8>, CollectError>> + Send>>;

/// Handle to a shell running inside a container
pub struct ProbeSession {
    container_id: String,
    command: String,
    input: ProbeInput,
    output: ProbeOutput,
    pending: Vec<u8>,
    broken: bool,
}

impl ProbeSession {
    pub fn new(
        container_id: impl Into<String>,
        command: impl Into<String>,
        input: ProbeInput,
        output: ProbeOutput,
    ) -> Self {
        Self {
            container_id: container_id.into(),
            command: command.into(),
            input,
            output,
            pending: Vec::new(),
            broken: false,
        }
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// A broken session cannot be run again and has to be replaced
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Mark the session unusable, e.g. after a run was abandoned mid-read
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Run the probe command once and return everything it printed
    pub async fn run(&mut self) -> Result<String, CollectError> {
        if self.broken {
            return Err(CollectError::Probe("probe session is broken".to_string()));
        }

        let result = self.exchange().await;
        if result.is_err() {
            self.broken = true;
        }
        result
    }

    async fn exchange(&mut self) -> Result<String, CollectError> {
        let line = format!("{}; echo {}\n", self.command, END_MARKER);
        self.input
            .write_all(line.as_bytes())
            .await
            .map_err(|e| CollectError::Probe(format!("write to probe session: {}", e)))?;
        self.input
            .flush()
            .await
            .map_err(|e| CollectError::Probe(format!("write to probe session: {}", e)))?;

        loop {
            if let Some(output) = take_until_marker(&mut self.pending) {
                return Ok(output);
            }

            match self.output.next().await {
                Some(Ok(chunk)) => self.pending.extend_from_slice(&chunk),
                Some(Err(e)) => return Err(e),
                None => return Err(CollectError::Probe("probe session closed".to_string())),
            }
        }
    }
}

impl fmt::Debug for ProbeSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeSession")
            .field("container_id", &self.container_id)
            .field("command", &self.command)
            .field("broken", &self.broken)
            .finish()
    }
}

/// Split off the output preceding the first marker line, if it has arrived
fn take_until_marker(pending: &mut Vec<u8>) -> Option<String> {
    let marker = format!("{}\n", END_MARKER);
    let marker = marker.as_bytes();

    let pos = pending
        .windows(marker.len())
        .enumerate()
        .find(|(i, window)| *window == marker && (*i == 0 || pending[i - 1] == b'\n'))
        .map(|(i, _)| i)?;

    let output = String::from_utf8_lossy(&pending[..pos]).into_owned();
    pending.drain(..pos + marker.len());
    Some(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;

    /// Session wired to in-memory pipes. Returns the session, the shell side
    /// of its input and the sender feeding its output.
    fn pipe_session() -> (
        ProbeSession,
        BufReader<tokio::io::DuplexStream>,
        mpsc::Sender<Result<Vec<u8>, CollectError>>,
    ) {
        let (input, shell) = tokio::io::duplex(1024);
        let (out_tx, out_rx) = mpsc::channel(8);
        let session = ProbeSession::new(
            "c1",
            "cat /proc/net/dev",
            Box::pin(input),
            Box::pin(ReceiverStream::new(out_rx)),
        );
        (session, BufReader::new(shell), out_tx)
    }

    fn chunk(text: &str) -> Result<Vec<u8>, CollectError> {
        Ok(text.as_bytes().to_vec())
    }

    #[test]
    fn test_take_until_marker() {
        let mut pending = format!("a\nb\n{}\nrest", END_MARKER).into_bytes();
        assert_eq!(take_until_marker(&mut pending).as_deref(), Some("a\nb\n"));
        assert_eq!(pending, b"rest");

        let mut partial = format!("a\n{}", END_MARKER).into_bytes();
        assert!(take_until_marker(&mut partial).is_none());
    }

    #[test]
    fn test_marker_must_start_a_line() {
        let mut pending = format!("x{}\n", END_MARKER).into_bytes();
        assert!(take_until_marker(&mut pending).is_none());
    }

    #[tokio::test]
    async fn test_run_writes_command_and_reads_to_marker() {
        let (mut session, mut shell, out_tx) = pipe_session();

        out_tx.send(chunk(" vnbe1: 1 2")).await.unwrap();
        out_tx
            .send(chunk(&format!(" 3\n{}\n", END_MARKER)))
            .await
            .unwrap();

        let output = session.run().await.unwrap();
        assert_eq!(output, " vnbe1: 1 2 3\n");

        let mut line = String::new();
        shell.read_line(&mut line).await.unwrap();
        assert_eq!(line, format!("cat /proc/net/dev; echo {}\n", END_MARKER));
        assert!(!session.is_broken());
    }

    #[tokio::test]
    async fn test_session_serves_many_runs() {
        let (mut session, _shell, out_tx) = pipe_session();

        for i in 0..3 {
            out_tx
                .send(chunk(&format!("run {}\n{}\n", i, END_MARKER)))
                .await
                .unwrap();
            assert_eq!(session.run().await.unwrap(), format!("run {}\n", i));
        }
    }

    #[tokio::test]
    async fn test_closed_output_breaks_session() {
        let (mut session, _shell, out_tx) = pipe_session();
        drop(out_tx);

        let result = session.run().await;
        assert!(matches!(result, Err(CollectError::Probe(_))));
        assert!(session.is_broken());

        // no further writes once broken
        assert!(session.run().await.is_err());
    }

    #[tokio::test]
    async fn test_stream_error_breaks_session() {
        let (mut session, _shell, out_tx) = pipe_session();
        out_tx
            .send(Err(CollectError::Probe("exec gone".to_string())))
            .await
            .unwrap();

        assert!(session.run().await.is_err());
        assert!(session.is_broken());
    }
}
