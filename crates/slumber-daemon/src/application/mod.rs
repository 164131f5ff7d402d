//! Application layer use cases for the daemon.
//!
//! # What is the "application" layer? (for beginners)
//!
//! In Clean Architecture the *application* layer sits between the domain
//! (pure rules in `slumber_core`) and the infrastructure (sockets, processes,
//! files).  Code here works on abstract byte streams and never opens a socket
//! itself, so it can be tested against scripted in-memory streams.
//!
//! # Sub-modules
//!
//! - **`handle_connection`** – Plays the Server List Ping grammar against one
//!   accepted connection and reports whether the client only wanted the
//!   status entry or is trying to join.

pub mod handle_connection;
