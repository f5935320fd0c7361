//! Deferred DOM mutations for browser-automation test fixtures.
//!
//! A fixture page shows results in a paragraph, injects a link a few seconds
//! after it loads, and can detach and reattach an element on a timer so that
//! element handles held by an automation client go stale. This crate performs
//! those mutations against an injected [`dom::DomHost`] and
//! [`scheduler::Scheduler`], and ships an in-memory document plus virtual and
//! tokio-backed timer queues so the behaviour can be tested without a browser.

pub mod config;
pub mod dom;
pub mod logging;
pub mod markup;
pub mod mutator;
pub mod page;
pub mod scheduler;
pub mod script;
pub mod wait;

pub use config::FixtureConfig;
pub use dom::{DomError, DomHost, InMemoryDom, NodeRef};
pub use mutator::{DeferredUiMutator, MutatorError, StaleOptions};
pub use page::FixturePage;
pub use scheduler::{ManualScheduler, Scheduler, TokioScheduler};
pub use wait::{StepError, WaitOptions, wait_for, wait_for_manual};
