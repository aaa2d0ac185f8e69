//! # Command Dispatch
//!
//! Runs playback commands off the caller's context.
//!
//! A [`CommandDispatcher`] owns a bounded queue drained by one worker task,
//! so commands reach the service in submission order. Results come back
//! either as a [`PendingCommand`] future or through a completion callback
//! invoked on the worker task.
//!
//! ```ignore
//! let dispatcher = channel.dispatcher();
//!
//! // From a UI handler that must not block:
//! dispatcher.submit_with(PlaybackCommand::Next, |outcome| {
//!     if let Err(err) = outcome {
//!         show_toast(err.to_string());
//!     }
//! })?;
//!
//! // From async code:
//! let CommandOutcome::Flag(playing) = dispatcher.execute(PlaybackCommand::IsPlaying).await? else {
//!     unreachable!()
//! };
//! ```

use core_library::Song;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::channel::PlaybackControlChannel;
use crate::error::{PlaybackError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackCommand {
    Play,
    Pause,
    Next,
    Seek { position_ms: u64 },
    PlaySong(Song),
    CurrentTrack,
    CurrentQueue,
    IsPlaying,
    IsPaused,
    Position,
    Length,
}

impl PlaybackCommand {
    pub fn name(&self) -> &'static str {
        match self {
            PlaybackCommand::Play => "play",
            PlaybackCommand::Pause => "pause",
            PlaybackCommand::Next => "next",
            PlaybackCommand::Seek { .. } => "seek",
            PlaybackCommand::PlaySong(_) => "play_song",
            PlaybackCommand::CurrentTrack => "current_track",
            PlaybackCommand::CurrentQueue => "current_queue",
            PlaybackCommand::IsPlaying => "is_playing",
            PlaybackCommand::IsPaused => "is_paused",
            PlaybackCommand::Position => "current_track_position",
            PlaybackCommand::Length => "current_track_length",
        }
    }
}

/// Value produced by a command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Done,
    Track(Option<Song>),
    Queue(Vec<Song>),
    Flag(bool),
    Millis(u64),
}

type Completion = Box<dyn FnOnce(Result<CommandOutcome>) + Send + 'static>;

enum Reply {
    Future(oneshot::Sender<Result<CommandOutcome>>),
    Callback(Completion),
}

impl Reply {
    fn deliver(self, outcome: Result<CommandOutcome>) {
        match self {
            Reply::Future(sender) => {
                // Receiver dropped: the caller stopped waiting.
                sender.send(outcome).ok();
            }
            Reply::Callback(complete) => complete(outcome),
        }
    }
}

struct Job {
    command: PlaybackCommand,
    reply: Reply,
}

/// Result of [`CommandDispatcher::submit`], resolved once the worker has
/// run the command.
#[derive(Debug)]
pub struct PendingCommand {
    receiver: oneshot::Receiver<Result<CommandOutcome>>,
}

impl Future for PendingCommand {
    type Output = Result<CommandOutcome>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(PlaybackError::DispatcherClosed)))
    }
}

/// Handle to a command worker. Clones share the same queue.
#[derive(Clone)]
pub struct CommandDispatcher {
    sender: mpsc::Sender<Job>,
    stop: CancellationToken,
}

impl CommandDispatcher {
    pub(crate) fn spawn(channel: Weak<PlaybackControlChannel>, depth: usize) -> Self {
        let (sender, receiver) = mpsc::channel(depth.max(1));
        let stop = CancellationToken::new();

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(run_worker(channel, receiver, stop.clone()));
            }
            Err(_) => {
                warn!("No Tokio runtime; command dispatcher created closed");
                drop(receiver);
            }
        }

        Self { sender, stop }
    }

    /// Queue `command` and wait for its result. Waits for queue space when
    /// the queue is full.
    pub async fn execute(&self, command: PlaybackCommand) -> Result<CommandOutcome> {
        let (sender, receiver) = oneshot::channel();
        self.sender
            .send(Job {
                command,
                reply: Reply::Future(sender),
            })
            .await
            .map_err(|_| PlaybackError::DispatcherClosed)?;
        PendingCommand { receiver }.await
    }

    /// Queue `command` without waiting.
    ///
    /// # Errors
    ///
    /// - [`PlaybackError::QueueFull`] when the queue has no space
    /// - [`PlaybackError::DispatcherClosed`] when the worker has stopped
    pub fn submit(&self, command: PlaybackCommand) -> Result<PendingCommand> {
        let (sender, receiver) = oneshot::channel();
        self.enqueue(Job {
            command,
            reply: Reply::Future(sender),
        })?;
        Ok(PendingCommand { receiver })
    }

    /// Queue `command` and hand its result to `on_complete` on the worker
    /// task. `on_complete` is not called when queueing fails.
    pub fn submit_with<F>(&self, command: PlaybackCommand, on_complete: F) -> Result<()>
    where
        F: FnOnce(Result<CommandOutcome>) + Send + 'static,
    {
        self.enqueue(Job {
            command,
            reply: Reply::Callback(Box::new(on_complete)),
        })
    }

    fn enqueue(&self, job: Job) -> Result<()> {
        self.sender.try_send(job).map_err(|err| match err {
            TrySendError::Full(job) => {
                debug!(command = job.command.name(), "Command queue full");
                PlaybackError::QueueFull
            }
            TrySendError::Closed(_) => PlaybackError::DispatcherClosed,
        })
    }

    /// Stop the worker. Queued commands that have not started complete with
    /// [`PlaybackError::DispatcherClosed`].
    pub fn close(&self) {
        self.stop.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.stop.is_cancelled() || self.sender.is_closed()
    }
}

impl fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("closed", &self.is_closed())
            .field("capacity", &self.sender.capacity())
            .finish()
    }
}

async fn run_worker(
    channel: Weak<PlaybackControlChannel>,
    mut receiver: mpsc::Receiver<Job>,
    stop: CancellationToken,
) {
    debug!("Command dispatcher started");
    loop {
        let job = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            job = receiver.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let outcome = match channel.upgrade() {
            Some(channel) => channel.run_command(job.command).await,
            None => Err(PlaybackError::DispatcherClosed),
        };
        job.reply.deliver(outcome);
    }

    receiver.close();
    while let Ok(job) = receiver.try_recv() {
        job.reply.deliver(Err(PlaybackError::DispatcherClosed));
    }
    debug!("Command dispatcher stopped");
}
