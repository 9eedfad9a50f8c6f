//! gbfw-core: Greybus firmware download protocol in Rust.
//!
//! This crate serves firmware images to a module bootrom over a Greybus
//! firmware connection: it reports image sizes, hands out chunks, and takes
//! the final ready-to-boot report.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants, operation header and payload structures
//! - **Transport**: Greybus connection abstraction (ES2 over nusb, mock)
//! - **Store**: Firmware image lookup (directories, memory)
//! - **Identity**: Interface ids, ES2 VID/PID fixup, firmware naming
//! - **Handlers**: Per-connection context and request handlers
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: High-level driver of one connection
//!
//! # Example
//!
//! ```no_run
//! use gbfw_core::session::{FirmwareSession, SessionConfig};
//!
//! let config = SessionConfig {
//!     firmware_dirs: vec!["/lib/firmware".into()],
//!     ..Default::default()
//! };
//!
//! let session = FirmwareSession::new(config);
//! let outcome = session.run().expect("firmware download failed");
//! println!("{outcome:?}");
//! ```

pub mod context;
pub mod error;
pub mod events;
pub mod handlers;
pub mod identity;
pub mod message;
pub mod naming;
pub mod protocol;
pub mod session;
pub mod store;
pub mod transport;

// Re-exports for convenience
pub use context::{BootPolicy, FirmwareContext, HandlerOptions};
pub use error::{ErrorKind, HandlerError, InitError};
pub use events::{
    FirmwareEvent, FirmwareObserver, FirmwarePhase, NullObserver, RecordingObserver,
    TracingObserver,
};
pub use handlers::{HandleResult, handle_request};
pub use identity::{
    FixupOutcome, IdentityRecord, InterfaceIdentity, es2_fixup_vid_pid, needs_vid_pid_fixup,
};
pub use message::Operation;
pub use naming::firmware_name;
pub use protocol::{BootStatus, OperationHeader, OperationType};
pub use session::{FirmwareSession, SessionConfig, SessionOutcome};
pub use store::{DirectoryStore, FirmwareBlob, FirmwareStore, MemoryStore, StoreError};
pub use transport::{Connection, Es2Connection, MockConnection, TransportError};
