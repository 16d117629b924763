//! SRCP Server Simulation Library
//!
//! This crate provides a simulated SRCP server for testing clients without
//! a layout or a real `srcpd`. It includes:
//!
//! - **VirtualServer**: the command state machine (handshake, GL and POWER
//!   devices, server-side locks, deterministic timestamps, error injection)
//! - **SimServer**: a shared handle serving in-process or TCP connections
//!
//! # Example
//!
//! ```rust
//! use srcp_sim::{Connection, VirtualServer};
//!
//! let mut server = VirtualServer::new();
//! let mut conn = Connection::new();
//!
//! server.process_line(&mut conn, "SET CONNECTIONMODE SRCP COMMAND");
//! let go = server.process_line(&mut conn, "GO");
//! assert!(go.ends_with("200 OK GO 1"));
//!
//! let reply = server.process_line(&mut conn, "INIT 1 GL 3 M 2 14 5");
//! assert!(reply.ends_with("200 OK"));
//! ```

pub mod server;
pub mod server_task;

pub use server::{Connection, GlState, VirtualServer, GREETING};
pub use server_task::{run_session_task, SimServer};
