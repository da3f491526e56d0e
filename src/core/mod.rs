//! Runtime core: per-slot state machines and the pool that staffs them.
//!
//! The public API from this module is [`Supervisor`], [`WorkerSupervisorPool`]
//! (with its [`PoolBuilder`]), [`SupervisorState`] and [`Outcome`].
//!
//! Internal modules:
//! - [`supervisor`]: drives one sandbox slot through its lifecycle;
//! - [`pool`]: keeps every slot staffed, pauses failed slots, graceful shutdown;
//! - [`script`]: runs helper scripts with timeout and output logging;
//! - [`process`]: spawning, exit decoding, output pumps, reaping;
//! - [`outcome`]: settle-once result channels;
//! - [`state`]: lifecycle states.

mod builder;
mod outcome;
mod pool;
mod process;
mod script;
mod state;
mod supervisor;

pub use builder::PoolBuilder;
pub use outcome::Outcome;
pub use pool::WorkerSupervisorPool;
pub use state::SupervisorState;
pub use supervisor::Supervisor;
