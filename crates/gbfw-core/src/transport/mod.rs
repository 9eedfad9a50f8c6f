//! Transport layer module.

pub mod mock;
pub mod nusb;
pub mod traits;

pub use mock::{MockConnection, SentResponse};
pub use nusb::Es2Connection;
pub use traits::{Connection, IncomingRequest, TransportError};
