//! Shared chat room with a collaborative drawing canvas, relayed over TCP.
//!
//! Clients speak newline-delimited lines: plain text is chat, and JSON
//! objects with a recognized `type` are drawing control events. Each module
//! owns one concern:
//!
//! - [`message`] classifies and encodes lines, plus async read/write helpers.
//! - [`registry`] tracks connected sessions and their writers.
//! - [`replay`] keeps the drawing log new participants are caught up with.
//! - [`hub`] routes chat and control events to sessions and isolates
//!   failures of individual recipients.
//! - [`server`] accepts connections and drives one receive loop per session.
//! - [`client`] connects to a hub and queues incoming events for a local view.
//! - [`view`] turns those events into a transcript and line segments.
//! - [`console`] is the terminal front end built on the client and view.
//! - [`netdiag`] holds standalone host networking queries.
//! - [`cli`] and [`error`] cover argument parsing and the error type.

pub mod cli;
pub mod client;
pub mod console;
pub mod error;
pub mod hub;
pub mod message;
pub mod netdiag;
pub mod registry;
pub mod replay;
pub mod server;
pub mod view;
