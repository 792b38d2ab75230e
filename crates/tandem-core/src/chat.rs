//! Cursor chat
//!
//! A transient text bubble attached to the local user's cursor and
//! broadcast through presence. [`CursorChat`] is the state machine;
//! [`CursorChatHandle`] drives it on a task and owns its single expiry
//! timer.
//!
//! ```text
//! idle --start--> composing --enter (text)--> displaying
//!   ^               |  ^  \                       |
//!   |               |  +---type (re-arms 5s)      |
//!   +--escape/blur/enter (empty)/5s expiry--------+--2s expiry
//! ```

use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// How long composing stays open without a keystroke
pub const COMPOSE_TIMEOUT: Duration = Duration::from_millis(5000);

/// How long a committed message stays visible
pub const DISPLAY_TIMEOUT: Duration = Duration::from_millis(2000);

/// Longest message, in characters
pub const MAX_MESSAGE_CHARS: usize = 64;

/// Chat phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatPhase {
    #[default]
    Idle,
    Composing,
    Displaying,
}

/// Observable chat state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChatState {
    phase: ChatPhase,
    message: String,
    input: String,
}

impl ChatState {
    pub fn phase(&self) -> ChatPhase {
        self.phase
    }

    pub fn is_composing(&self) -> bool {
        self.phase == ChatPhase::Composing
    }

    /// Message being broadcast, if any
    pub fn current_message(&self) -> Option<&str> {
        if self.message.is_empty() {
            None
        } else {
            Some(&self.message)
        }
    }

    /// Text in the input box
    pub fn input(&self) -> &str {
        &self.input
    }
}

/// Keys with a meaning while composing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKey {
    Enter,
    Escape,
}

/// Events fed to the chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatInput {
    /// Open the input
    Start,
    /// New contents of the input box
    Type(String),
    Key(ChatKey),
    /// Pasted text; ignored
    Paste(String),
    /// Input lost focus
    Blur,
}

/// Cursor chat state machine
///
/// Time is passed in explicitly so the machine stays synchronous; the
/// owner calls [`CursorChat::fire`] once [`CursorChat::deadline`] passes.
#[derive(Debug, Clone, Default)]
pub struct CursorChat {
    state: ChatState,
    expiry: Option<Instant>,
}

impl CursorChat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    pub fn is_composing(&self) -> bool {
        self.state.is_composing()
    }

    pub fn current_message(&self) -> Option<&str> {
        self.state.current_message()
    }

    /// When the live timer fires, if one is armed
    pub fn deadline(&self) -> Option<Instant> {
        self.expiry
    }

    /// Apply one input; returns whether the state changed
    pub fn handle(&mut self, input: ChatInput, now: Instant) -> bool {
        let before = self.state.clone();
        match input {
            ChatInput::Start => self.start(now),
            ChatInput::Type(text) => self.type_text(&text, now),
            ChatInput::Key(key) => self.key(key, now),
            ChatInput::Paste(_) => {}
            ChatInput::Blur => self.blur(),
        }
        self.state != before
    }

    /// Enter composing, keeping any message still on display
    pub fn start(&mut self, now: Instant) {
        self.state.phase = ChatPhase::Composing;
        self.arm(now, COMPOSE_TIMEOUT);
    }

    /// Replace the input contents; the message follows as typed
    pub fn type_text(&mut self, text: &str, now: Instant) {
        if !self.is_composing() {
            return;
        }
        let text: String = text.chars().take(MAX_MESSAGE_CHARS).collect();
        self.state.message = text.clone();
        self.state.input = text;
        self.arm(now, COMPOSE_TIMEOUT);
    }

    pub fn key(&mut self, key: ChatKey, now: Instant) {
        if !self.is_composing() {
            return;
        }
        match key {
            ChatKey::Enter if self.state.input.is_empty() => self.clear(),
            ChatKey::Enter => {
                self.state.input.clear();
                if self.state.message.is_empty() {
                    self.clear();
                } else {
                    self.state.phase = ChatPhase::Displaying;
                    self.arm(now, DISPLAY_TIMEOUT);
                }
            }
            ChatKey::Escape => self.clear(),
        }
    }

    /// Losing focus cancels composing
    pub fn blur(&mut self) {
        if self.is_composing() {
            self.clear();
        }
    }

    /// Expire if the deadline has passed; returns whether it did
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.expiry {
            Some(deadline) if now >= deadline => {
                debug!("Cursor chat expired in {:?}", self.state.phase);
                self.clear();
                true
            }
            _ => false,
        }
    }

    /// Back to idle with nothing armed
    pub fn clear(&mut self) {
        self.expiry = None;
        self.state = ChatState::default();
    }

    fn arm(&mut self, now: Instant, timeout: Duration) {
        self.expiry = Some(now + timeout);
    }
}

/// Runs a [`CursorChat`] on a task
///
/// Dropping the handle stops the task and its timer.
#[derive(Debug)]
pub struct CursorChatHandle {
    input: mpsc::UnboundedSender<ChatInput>,
    state: watch::Receiver<ChatState>,
    task: JoinHandle<()>,
}

impl CursorChatHandle {
    /// Start the driver; must be called inside a tokio runtime
    pub fn spawn() -> Self {
        let (input, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ChatState::default());
        let task = tokio::spawn(drive(CursorChat::new(), rx, state_tx));
        Self { input, state, task }
    }

    /// Feed one input
    pub fn send(&self, input: ChatInput) {
        let _ = self.input.send(input);
    }

    pub fn start(&self) {
        self.send(ChatInput::Start);
    }

    pub fn type_text(&self, text: impl Into<String>) {
        self.send(ChatInput::Type(text.into()));
    }

    pub fn key(&self, key: ChatKey) {
        self.send(ChatInput::Key(key));
    }

    pub fn blur(&self) {
        self.send(ChatInput::Blur);
    }

    /// Current state
    pub fn state(&self) -> ChatState {
        self.state.borrow().clone()
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.state.clone()
    }
}

impl Drop for CursorChatHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn drive(
    mut chat: CursorChat,
    mut inputs: mpsc::UnboundedReceiver<ChatInput>,
    state: watch::Sender<ChatState>,
) {
    loop {
        let changed = tokio::select! {
            input = inputs.recv() => match input {
                Some(input) => chat.handle(input, Instant::now()),
                None => break,
            },
            _ = expiry(chat.deadline()) => chat.fire(Instant::now()),
        };

        if changed {
            state.send_replace(chat.state().clone());
        }
    }
}

/// Resolves at the deadline, or never when nothing is armed
async fn expiry(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
