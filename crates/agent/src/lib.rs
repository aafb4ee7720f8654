//! The worker control loop: the heart of CronBot.
//!
//! The worker follows a **Claim → Plan → Execute → Verify** cycle:
//!
//! 1. **Check** the blocker histories (code loop, verification loop, tool failure)
//! 2. **Claim** the next unit of work from the configured work source
//! 3. **Reason** with the oracle, dispatching tool calls through the capability registry
//! 4. **Verify and report** the outcome, checkpointing along the way
//!
//! The loop runs until its [`StopHandle`] fires. Failures in a unit of work
//! never end it: they are journaled, checkpointed and backed off from.

pub mod blocker;
pub mod prompt;
pub mod stop;
pub mod worker;

pub use blocker::{BlockerHistories, ContentHasher, Sha256Hasher, VerificationRecord};
pub use stop::StopHandle;
pub use worker::{Iteration, Worker, WorkerSettings};
