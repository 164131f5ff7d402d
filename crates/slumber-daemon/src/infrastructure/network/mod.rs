//! Network infrastructure for the daemon.
//!
//! # Sub-modules
//!
//! - **`controller`** – Owns the game port.  Runs the accept loop, hands the
//!   port to the real server on a login attempt and takes it back when the
//!   server exits.

pub mod controller;
