//! Infrastructure layer for the daemon.
//!
//! Contains OS-facing adapters: the listening socket, the server child
//! process and the config file.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `slumber_core`, but MUST NOT be imported by the `application` layer.

pub mod network;
pub mod storage;
pub mod supervisor;
