//! SRCP Client Runtime
//!
//! This crate drives model railway decoders through an SRCP server. It
//! includes:
//!
//! - **CommandChannel / Session**: the command connection, its handshake and
//!   request/reply round trips
//! - **LockControl**: cross-session device locks and control object registry
//! - **LocomotiveControl**: validation, lazy initialization, speed/function
//!   commands, and reconciliation of info channel pushes
//! - **LocomotiveStrategy**: per-decoder command generation, including two
//!   decoders driven as one locomotive
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use srcp_client::{ClientConfig, LockControl, Locomotive, LocomotiveControl, LocomotiveKind, Session};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let session = Session::connect(&ClientConfig::new("localhost", 4303)).await?;
//!
//! let control = LocomotiveControl::new(Arc::new(LockControl::new()));
//! control.set_session(Some(session));
//!
//! let loco = Locomotive::shared(LocomotiveKind::MmDigital, 1, 3);
//! control.add_locomotive(&loco);
//! control.set_speed(&loco, 7, &[true, false, false, false, false]).await?;
//! control.toggle_direction(&loco).await?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod control;
pub mod devices;
pub mod error;
pub mod events;
pub mod lock;
pub mod locomotive;
pub mod session;
pub mod strategy;

// Re-export connection types
pub use channel::{CommandChannel, Transport};
pub use config::ClientConfig;
pub use session::{Session, SessionId};

// Re-export control types
pub use control::LocomotiveControl;
pub use devices::{GlDevice, PowerDevice};
pub use lock::LockControl;
pub use locomotive::{Locomotive, LocomotiveKind, SharedLocomotive};
pub use strategy::LocomotiveStrategy;

pub use error::{ConfigError, ConnectionError, LockError, LocomotiveError, ModelError, SrcpError};
pub use events::{CommandData, Listener, ListenerSet, LockChange, LocomotiveChange};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default log filter when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "srcp_protocol=info,srcp_client=info,srcp_sim=info";

/// Install a `fmt` subscriber filtered by `RUST_LOG`
///
/// Does nothing if a global subscriber is already set.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
