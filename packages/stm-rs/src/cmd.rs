//! Commands: deferred units of work that feed messages back to a machine.
//!
//! A [`Cmd`] is invoked with no arguments and yields at most one message, or a
//! batch of further commands. Commands never see the machine's state; the only
//! way they communicate is by returning messages.
//!
//! # Constructors
//!
//! | Constructor         | Yields                                           |
//! |---------------------|--------------------------------------------------|
//! | [`to_cmd`]          | the given message, immediately                   |
//! | [`to_cmd_opt`]      | the given message if present, otherwise nothing  |
//! | [`batch`]           | a batch, unrolled by the dispatcher              |
//! | [`timer`]           | the given message once a duration has elapsed    |
//! | [`timer_delta`]     | like `timer`, negative deltas count as zero      |
//! | [`timer_at`]        | the given message at a wall-clock deadline       |
//! | [`Cmd::new`]        | whatever an async closure returns                |
//! | [`Cmd::blocking`]   | whatever a blocking closure returns              |
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use stm::{batch, timer, to_cmd};
//!
//! let cmd = batch([
//!     to_cmd(Msg::Started),
//!     timer(Duration::from_secs(5), Msg::TimedOut),
//! ]);
//! machine.send(cmd);
//! ```

use std::fmt;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use futures::future::{self, BoxFuture};
use futures::FutureExt;

/// What a command produces when it runs.
#[derive(Debug)]
pub enum Output<M> {
    /// A single message, delivered to the machine's queue.
    Msg(M),
    /// More commands, each dispatched independently and concurrently.
    Batch(Vec<Cmd<M>>),
}

type Thunk<M> = Box<dyn FnOnce() -> BoxFuture<'static, Option<Output<M>>> + Send>;

/// A deferred, possibly long-running unit of work.
///
/// Nothing happens until the command is invoked, which the dispatcher does on
/// its own task. A command runs at most once.
pub struct Cmd<M> {
    thunk: Thunk<M>,
}

impl<M: Send + 'static> Cmd<M> {
    /// Create a command from an async closure producing at most one message.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let cmd = Cmd::new(move || async move {
    ///     let body = client.get(url).send().await.ok()?.text().await.ok()?;
    ///     Some(Msg::Fetched(body))
    /// });
    /// ```
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Option<M>> + Send + 'static,
    {
        Self::from_output(move || f().map(|msg| msg.map(Output::Msg)))
    }

    /// Create a command from a blocking closure.
    ///
    /// The closure runs on tokio's blocking pool, so it may sleep or do
    /// synchronous IO without stalling async tasks. A panic inside the closure
    /// is re-raised on the command's own task.
    pub fn blocking<F>(f: F) -> Self
    where
        F: FnOnce() -> Option<M> + Send + 'static,
    {
        Self::new(move || async move {
            match tokio::task::spawn_blocking(f).await {
                Ok(msg) => msg,
                Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                // Runtime is shutting down
                Err(_) => None,
            }
        })
    }

    /// A command that runs and produces nothing.
    pub fn none() -> Self {
        Self::from_output(|| future::ready(None))
    }

    /// Create a command from a closure that yields a full [`Output`].
    pub fn from_output<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Option<Output<M>>> + Send + 'static,
    {
        Self {
            thunk: Box::new(move || f().boxed()),
        }
    }

    /// Run the command.
    ///
    /// The dispatcher calls this on a freshly spawned task; it is public so
    /// commands can be exercised without a machine.
    pub fn invoke(self) -> BoxFuture<'static, Option<Output<M>>> {
        (self.thunk)()
    }
}

impl<M> fmt::Debug for Cmd<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cmd").finish_non_exhaustive()
    }
}

/// Group commands into one command whose output is a batch.
///
/// Building the batch runs nothing. When dispatched, every member is sent on
/// its own task; members have no ordering relative to each other. An empty
/// batch is a legal no-op.
pub fn batch<M: Send + 'static>(cmds: impl IntoIterator<Item = Cmd<M>>) -> Cmd<M> {
    let cmds: Vec<Cmd<M>> = cmds.into_iter().collect();
    Cmd::from_output(move || future::ready(Some(Output::Batch(cmds))))
}

/// A command that yields `msg` immediately.
pub fn to_cmd<M: Send + 'static>(msg: M) -> Cmd<M> {
    Cmd::from_output(move || future::ready(Some(Output::Msg(msg))))
}

/// A command that yields `msg` if present and nothing otherwise.
pub fn to_cmd_opt<M: Send + 'static>(msg: Option<M>) -> Cmd<M> {
    Cmd::from_output(move || future::ready(msg.map(Output::Msg)))
}

/// A command that sleeps for `after` on its own task, then yields `msg`.
pub fn timer<M: Send + 'static>(after: Duration, msg: M) -> Cmd<M> {
    Cmd::new(move || async move {
        tokio::time::sleep(after).await;
        Some(msg)
    })
}

/// Like [`timer`], but takes a signed delta. Negative deltas count as zero.
pub fn timer_delta<M: Send + 'static>(delta: TimeDelta, msg: M) -> Cmd<M> {
    timer(clamp_delta(delta), msg)
}

/// A command that yields `msg` once the wall clock reaches `deadline`.
///
/// The remaining time is measured when the command starts running; a deadline
/// already in the past fires without waiting.
pub fn timer_at<M: Send + 'static>(deadline: DateTime<Utc>, msg: M) -> Cmd<M> {
    Cmd::new(move || async move {
        tokio::time::sleep(clamp_delta(deadline - Utc::now())).await;
        Some(msg)
    })
}

fn clamp_delta(delta: TimeDelta) -> Duration {
    delta.to_std().unwrap_or(Duration::ZERO)
}
