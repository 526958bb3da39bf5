//! # Courier Testkit
//!
//! Testing utilities for Courier.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: a shared in-memory store and a manual clock, with queue and
//!   sync manager builders wired to them
//! - **Scripted collaborators**: a [`RecordingProcessor`] and a
//!   [`ScriptedTransport`] that record every call and replay canned outcomes
//! - **Generators**: Proptest strategies for payloads, priorities and items
//!
//! ## Test Fixtures
//!
//! ```rust,ignore
//! use courier_testkit::{RecordingProcessor, TestFixture};
//!
//! let fixture = TestFixture::new();
//! let queue = fixture.queue(TestFixture::manual_queue_config());
//! queue.init().await?;
//!
//! let processor = RecordingProcessor::failing_first(2);
//! queue.set_processor_arc(processor.clone());
//! ```

pub mod fixtures;
pub mod generators;
pub mod processor;
pub mod transport;

pub use fixtures::{send_message, TestFixture};
pub use processor::RecordingProcessor;
pub use transport::{messages, ScriptedTransport};
