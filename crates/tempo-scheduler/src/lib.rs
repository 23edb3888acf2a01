//! `tempo-scheduler` — durable message scheduling with SQLite persistence.
//!
//! # Overview
//!
//! Callers hand the [`scheduler::MessageScheduler`] a payload, a trigger
//! time, and an optional recurrence rule. The entry is persisted in the
//! `scheduler_messages` table; a driver (the [`engine::ReleaseEngine`] or a
//! CLI command) later asks the store for due identifiers and feeds them to
//! the [`executor::ScheduleExecutor`], which delivers the payload and
//! either re-arms the entry or marks it completed.
//!
//! ```text
//! MessageScheduler.schedule ──▶ ScheduleStore (pending)
//!                                    │ find_pending(now)
//!                                    ▼
//!                            ScheduleExecutor.execute
//!                                    │ deliver(payload)
//!                                    ▼
//!                     rule.next? ──▶ re-arm (pending, next trigger)
//!                                └─▶ complete (one-shot / exhausted)
//! ```
//!
//! Delivery is at-least-once: two racing release loops may both pick up
//! the same due identifier. [`ScheduleStore::claim`] narrows that window
//! to a single atomic winner; lost delivery is never acceptable, duplicate
//! delivery under a true race is.
//!
//! # Recurrence rules
//!
//! | Text form                        | Behaviour                         |
//! |----------------------------------|-----------------------------------|
//! | `FREQ=DAILY`                     | Every day, forever                |
//! | `FREQ=HOURLY;INTERVAL=6`         | Every six hours                   |
//! | `FREQ=WEEKLY;COUNT=10`           | Ten occurrences from the start    |
//! | `FREQ=MONTHLY;UNTIL=<rfc3339>`   | Monthly until the bound passes    |

pub mod db;
pub mod engine;
pub mod error;
pub mod executor;
pub mod rule;
pub mod scheduler;
pub mod store;
pub mod types;

pub use engine::ReleaseEngine;
pub use error::{Result, SchedulerError};
pub use executor::{Deliver, ScheduleExecutor};
pub use rule::{Freq, RecurrenceRule};
pub use scheduler::{JsonCodec, MessageScheduler, PayloadCodec};
pub use store::{ScheduleStore, SqliteScheduleStore};
pub use types::{ScheduleEntry, ScheduleState};
