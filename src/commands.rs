//! User command channel and line prompts
//!
//! Front-ends feed key presses into the [`CommandBus`]. The watchdog drains the
//! pending queue on every tick and broadcasts the commands to whoever is
//! currently listening (an album or image batch). Key presses that arrive
//! while nobody listens, or before a batch starts listening, are discarded so
//! a stale keypress cannot cancel a later batch.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::broadcast;

use crate::services::Interaction;

/// Command issued by the user while a batch runs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserCommand {
    /// Cancel the batch currently downloading
    Cancel,
}

impl UserCommand {
    /// Map a key press to a command
    pub fn from_key(key: char) -> Option<Self> {
        match key.to_ascii_lowercase() {
            'c' => Some(UserCommand::Cancel),
            _ => None,
        }
    }
}

/// Queue of pending key presses plus the broadcast to active listeners
#[derive(Clone, Debug)]
pub struct CommandBus {
    pending: Arc<Mutex<VecDeque<UserCommand>>>,
    tx: broadcast::Sender<UserCommand>,
    listeners: Arc<AtomicUsize>,
}

impl Default for CommandBus {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandBus {
    /// Create an empty bus
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(16);
        Self {
            pending: Arc::new(Mutex::new(VecDeque::new())),
            tx,
            listeners: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queue a key press; unknown keys are ignored
    pub fn push_key(&self, key: char) {
        if let Some(cmd) = UserCommand::from_key(key) {
            self.push(cmd);
        }
    }

    /// Queue a command
    pub fn push(&self, cmd: UserCommand) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(cmd);
    }

    /// Whether a batch is currently listening
    pub fn is_intercepting(&self) -> bool {
        self.listeners.load(Ordering::SeqCst) > 0
    }

    /// Drain the pending queue to the listeners
    ///
    /// Returns the number of commands delivered.
    pub fn dispatch(&self) -> usize {
        let drained: Vec<UserCommand> = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();

        if !self.is_intercepting() {
            return 0;
        }

        drained
            .into_iter()
            .filter(|cmd| self.tx.send(*cmd).is_ok())
            .count()
    }

    /// Start listening for commands
    ///
    /// Key presses queued before the listener existed are dropped. The bus
    /// counts as intercepting until the listener is dropped.
    pub fn listen(&self) -> CommandListener {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.listeners.fetch_add(1, Ordering::SeqCst);
        CommandListener {
            rx: self.tx.subscribe(),
            listeners: self.listeners.clone(),
        }
    }
}

/// Receiving end of the [`CommandBus`]
#[derive(Debug)]
pub struct CommandListener {
    rx: broadcast::Receiver<UserCommand>,
    listeners: Arc<AtomicUsize>,
}

impl CommandListener {
    /// Next command, or `None` when the bus is gone
    pub async fn recv(&mut self) -> Option<UserCommand> {
        loop {
            match self.rx.recv().await {
                Ok(cmd) => return Some(cmd),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for CommandListener {
    fn drop(&mut self) {
        self.listeners.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Prompts on stdout and reads answers from stdin
pub struct StdinInteraction {
    lines: tokio::sync::Mutex<Lines<BufReader<Stdin>>>,
}

impl Default for StdinInteraction {
    fn default() -> Self {
        Self::new()
    }
}

impl StdinInteraction {
    /// Create a prompt reader over the process stdin
    pub fn new() -> Self {
        Self {
            lines: tokio::sync::Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

#[async_trait]
impl Interaction for StdinInteraction {
    async fn read_line(&self, prompt: &str) -> Option<String> {
        let mut stdout = tokio::io::stdout();
        if let Err(e) = stdout.write_all(prompt.as_bytes()).await {
            tracing::warn!(error = %e, "Failed to write prompt");
        }
        stdout.flush().await.ok();

        match self.lines.lock().await.next_line().await {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read from stdin");
                None
            }
        }
    }

    fn show_candidates(&self, position: usize, total: usize, tracks: &[crate::types::Track]) {
        println!("[{} / {}]", position + 1, total);
        for (i, track) in tracks.iter().enumerate() {
            let name = track
                .first_candidate()
                .map(|c| c.file.filename)
                .unwrap_or_else(|| track.display_name(false));
            println!("  {:>3}. {}", i + 1, name);
        }
    }

    fn message(&self, text: &str) {
        println!("{}", text);
    }
}
