//! Integration tests for the outbox relay.
//!
//! - Payment lifecycle through the transactional mutator
//! - Outbox draining, retry exhaustion and manual retry
//! - Idempotent consumers and campaign totals
//! - The threaded pipeline from commit to projection

#[path = "../support/mod.rs"]
mod support;

mod consumers;
mod outbox;
mod payments;
mod pipeline;
