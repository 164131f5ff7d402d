//! Domain rules for the sleep/wake front.
//!
//! Pure logic with no sockets or processes: the lifecycle graph that decides
//! who owns the game port at any moment.  The daemon crate drives these
//! transitions; this module only says which ones are legal.

pub mod lifecycle;
