//! The `State` trait and the transition helper.
//!
//! Each logical mode of a machine is its own type implementing [`State`].
//! `update` consumes the current state and returns the next one, which may be
//! the same value, a modified copy, or a different variant entirely.
//!
//! # Key Properties
//!
//! - **Owned by the loop**: only the scheduler loop ever holds the current state
//! - **Serial**: `update` is never called concurrently
//! - **No IO in `update`**: side effects go into the returned [`Cmd`]

use crate::cmd::{batch, Cmd};

/// The next state plus an optional command, as returned by [`State::update`].
pub type Transition<M> = (Box<dyn State<M>>, Option<Cmd<M>>);

/// One behavior mode of a state machine.
///
/// # Example
///
/// ```ignore
/// use stm::{to_cmd, transition_to, Cmd, State, Transition};
///
/// enum Msg { Ping, Pong, Start }
///
/// struct Idle;
/// struct Running;
///
/// impl State<Msg> for Idle {
///     fn update(self: Box<Self>, msg: Msg) -> Transition<Msg> {
///         match msg {
///             Msg::Ping => (self, Some(to_cmd(Msg::Pong))),
///             Msg::Start => transition_to(Running, []),
///             _ => (self, None),
///         }
///     }
/// }
///
/// impl State<Msg> for Running {
///     fn update(self: Box<Self>, _msg: Msg) -> Transition<Msg> {
///         (self, None)
///     }
///
///     fn init(&self) -> Option<Cmd<Msg>> {
///         Some(to_cmd(Msg::Ping))
///     }
/// }
/// ```
pub trait State<M>: Send + 'static {
    /// Handle one message and return the next state and an optional command.
    ///
    /// # Guarantees
    ///
    /// - Called on the scheduler loop's task only
    /// - Called serially, in queue order
    ///
    /// Keep this fast: a slow `update` holds up every queued message. Put
    /// slow work in the returned command instead; its result comes back as a
    /// message.
    fn update(self: Box<Self>, msg: M) -> Transition<M>;

    /// The command to run when this state becomes current via
    /// [`transition_to`].
    ///
    /// Not called for the initial state of a machine.
    fn init(&self) -> Option<Cmd<M>> {
        None
    }
}

/// Move to `state`, running its `init` command and the given follow-ups.
///
/// The init command goes first in the resulting batch. Batch members still
/// run concurrently, so the init message and the follow-up messages can reach
/// `state.update` in any order.
pub fn transition_to<M, S>(state: S, cmds: impl IntoIterator<Item = Cmd<M>>) -> Transition<M>
where
    M: Send + 'static,
    S: State<M>,
{
    let init = state.init();
    let cmds: Vec<Cmd<M>> = init.into_iter().chain(cmds).collect();
    (Box::new(state), Some(batch(cmds)))
}
