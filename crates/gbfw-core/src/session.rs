//! Firmware session - drives one connection from handshake to boot.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::context::{BootPolicy, FirmwareContext, HandlerOptions};
use crate::events::{FirmwareObserver, TracingObserver};
use crate::handlers::HandleResult;
use crate::identity::{IdentityRecord, InterfaceIdentity};
use crate::message::Operation;
use crate::protocol::BootStatus;
use crate::protocol::constants::{DEFAULT_FIRMWARE_DIR, GB_OP_SUCCESS};
use crate::store::{DirectoryStore, FirmwareStore};
use crate::transport::{Connection, Es2Connection, TransportError};

/// Configuration for a firmware session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Directories searched for firmware images, in order.
    pub firmware_dirs: Vec<PathBuf>,
    /// Handling of INSECURE ready-to-boot reports.
    pub boot_policy: BootPolicy,
    /// Images larger than this are refused.
    pub max_image_size: Option<u64>,
    /// CPort of the firmware connection on the bridge.
    pub cport_id: u16,
    /// Stop after this many requests.
    pub max_requests: Option<usize>,
    /// Identity reported at hotplug. Unset means an ES2 module with no
    /// VID/PID, to be asked from the bootrom.
    pub identity: Option<InterfaceIdentity>,
    /// How long to wait for the bridge to show up, in seconds.
    pub wait_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            firmware_dirs: vec![PathBuf::from(DEFAULT_FIRMWARE_DIR)],
            boot_policy: BootPolicy::default(),
            max_image_size: None,
            cport_id: 1,
            max_requests: None,
            identity: None,
            wait_timeout_secs: 60,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn handler_options(&self) -> HandlerOptions {
        HandlerOptions {
            boot_policy: self.boot_policy,
        }
    }

    /// Firmware store over the configured directories.
    pub fn store(&self) -> DirectoryStore {
        DirectoryStore::new(self.firmware_dirs.iter().cloned())
            .with_max_image_size(self.max_image_size)
    }

    /// Identity the session starts from.
    pub fn initial_identity(&self) -> InterfaceIdentity {
        self.identity
            .unwrap_or_else(InterfaceIdentity::es2_unresolved)
    }
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Bootrom accepted an image and is booting it.
    Booted(BootStatus),
    /// Remote end went away before reporting ready-to-boot.
    Disconnected,
    /// The configured request limit was reached.
    RequestLimit,
}

/// Firmware session - serves one bootrom until it boots or goes away.
pub struct FirmwareSession<O: FirmwareObserver> {
    config: SessionConfig,
    observer: Arc<O>,
}

impl FirmwareSession<TracingObserver> {
    /// Create a new session with default tracing observer.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_observer(config, Arc::new(TracingObserver))
    }
}

impl<O: FirmwareObserver> FirmwareSession<O> {
    /// Create a new session with a custom observer.
    pub fn with_observer(config: SessionConfig, observer: Arc<O>) -> Self {
        Self { config, observer }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Wait for the ES2 bridge and serve firmware over it.
    #[instrument(skip(self), fields(cport = self.config.cport_id))]
    pub fn run(&self) -> Result<SessionOutcome> {
        let connection = self.wait_for_device()?;
        let store = self.config.store();
        let mut identity = self.config.initial_identity();
        info!(identity = %identity, "Serving firmware");

        self.serve(&connection, &store, &mut identity)
    }

    /// Serve firmware on an already open connection.
    ///
    /// Runs connection setup, answers requests until the bootrom reports
    /// ready-to-boot, disconnects, or the request limit is hit, and always
    /// tears the connection down afterwards.
    pub fn serve<C, S>(
        &self,
        connection: &C,
        store: &S,
        identity: &mut dyn IdentityRecord,
    ) -> Result<SessionOutcome>
    where
        C: Connection + ?Sized,
        S: FirmwareStore + ?Sized,
    {
        let mut ctx = FirmwareContext::connection_init(
            connection,
            store,
            identity,
            self.observer.as_ref(),
            self.config.handler_options(),
        )?;

        let outcome = self.request_loop(&mut ctx);
        ctx.connection_exit();
        outcome
    }

    fn request_loop<C, S>(&self, ctx: &mut FirmwareContext<'_, C, S, O>) -> Result<SessionOutcome>
    where
        C: Connection + ?Sized,
        S: FirmwareStore + ?Sized,
    {
        let mut served = 0usize;

        loop {
            if let Some(max) = self.config.max_requests
                && served >= max
            {
                warn!(max, "Request limit reached");
                return Ok(SessionOutcome::RequestLimit);
            }

            let incoming = match ctx.connection().recv_request() {
                Ok(r) => r,
                Err(TransportError::Timeout { .. }) => continue,
                Err(TransportError::Disconnected) => {
                    warn!("Remote end disconnected");
                    return Ok(SessionOutcome::Disconnected);
                }
                Err(e) => return Err(e.into()),
            };
            served += 1;

            let max_payload = ctx.connection().max_payload_size();
            let mut op = Operation::from_incoming(incoming, max_payload);
            let (result, booted) = match ctx.handle_request(&mut op) {
                Ok(HandleResult::Continue) => (GB_OP_SUCCESS, None),
                Ok(HandleResult::ReadyToBoot(status)) => (GB_OP_SUCCESS, Some(status)),
                Err(e) => (e.result_code(), None),
            };

            if op.header().is_unidirectional() {
                debug!(op_type = op.op_type(), "Unidirectional request, no response");
            } else {
                match ctx
                    .connection()
                    .send_response(op.header(), result, op.response_payload())
                {
                    Ok(()) => {}
                    Err(TransportError::Disconnected) => {
                        warn!("Remote end disconnected while responding");
                        return Ok(SessionOutcome::Disconnected);
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            if let Some(status) = booted {
                info!(status = %status, "Firmware handed over");
                return Ok(SessionOutcome::Booted(status));
            }
        }
    }

    fn wait_for_device(&self) -> Result<Es2Connection> {
        info!("Waiting for ES2 bridge...");
        let timeout = Duration::from_secs(self.config.wait_timeout_secs);
        let start = Instant::now();
        let mut poll_count = 0u64;

        loop {
            poll_count += 1;

            match Es2Connection::open(self.config.cport_id) {
                Ok(c) => {
                    info!("Bridge found after {} polls", poll_count);
                    return Ok(c);
                }
                Err(TransportError::DeviceNotFound { .. }) => {
                    if start.elapsed() > timeout {
                        return Err(anyhow!(
                            "Timeout waiting for device after {}s",
                            timeout.as_secs()
                        ));
                    }
                    thread::sleep(Duration::from_millis(100));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{FirmwareEvent, RecordingObserver};
    use crate::naming::firmware_name;
    use crate::protocol::constants::*;
    use crate::store::MemoryStore;
    use crate::transport::MockConnection;
    use tempfile::NamedTempFile;

    fn chunk(offset: u32, size: u32) -> Vec<u8> {
        let mut payload = offset.to_le_bytes().to_vec();
        payload.extend_from_slice(&size.to_le_bytes());
        payload
    }

    fn identity() -> InterfaceIdentity {
        InterfaceIdentity::new(0x126, 0x1000, 0xAB, 0xCD)
    }

    #[test]
    fn test_config_default() {
        let config = SessionConfig::default();
        assert_eq!(config.firmware_dirs, vec![PathBuf::from("/lib/firmware")]);
        assert_eq!(config.boot_policy, BootPolicy::AcceptInsecure);
        assert_eq!(config.initial_identity(), InterfaceIdentity::es2_unresolved());
    }

    #[test]
    fn test_config_toml_partial() {
        let config: SessionConfig = toml::from_str(
            r#"
            firmware_dirs = ["/tmp/fw"]
            boot_policy = "require-secure"
            max_requests = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.firmware_dirs, vec![PathBuf::from("/tmp/fw")]);
        assert_eq!(config.boot_policy, BootPolicy::RequireSecure);
        assert_eq!(config.max_requests, Some(10));
        assert_eq!(config.cport_id, 1);
        assert_eq!(config.handler_options().boot_policy, BootPolicy::RequireSecure);
    }

    #[test]
    fn test_config_file_roundtrip() {
        let file = NamedTempFile::new().unwrap();
        let config = SessionConfig {
            identity: Some(identity()),
            max_image_size: Some(1 << 20),
            ..Default::default()
        };
        config.save_to_file(file.path()).unwrap();
        let loaded = SessionConfig::load_from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_serve_until_boot() {
        let mock = MockConnection::new();
        mock.queue_sync_response(GB_FIRMWARE_TYPE_AP_READY, &[]);
        mock.queue_request(GB_FIRMWARE_TYPE_FIRMWARE_SIZE, &[1]);
        mock.queue_request(GB_FIRMWARE_TYPE_GET_FIRMWARE, &chunk(0, 6));
        mock.queue_request(GB_FIRMWARE_TYPE_GET_FIRMWARE, &chunk(6, 4));
        mock.queue_request(GB_FIRMWARE_TYPE_READY_TO_BOOT, &[GB_FIRMWARE_BOOT_STATUS_SECURE]);
        mock.queue_request(GB_FIRMWARE_TYPE_FIRMWARE_SIZE, &[2]);

        let store = MemoryStore::new();
        let mut identity = identity();
        store.insert(firmware_name(&identity, 1), b"0123456789".to_vec());
        let observer = Arc::new(RecordingObserver::new());
        let session = FirmwareSession::with_observer(SessionConfig::default(), observer.clone());

        let outcome = session.serve(&mock, &store, &mut identity).unwrap();
        assert_eq!(outcome, SessionOutcome::Booted(BootStatus::Secure));

        let responses = mock.responses();
        assert_eq!(responses.len(), 4);
        assert!(responses.iter().all(|r| r.result() == GB_OP_SUCCESS));
        assert_eq!(responses[0].payload, 10u32.to_le_bytes());
        assert_eq!(responses[1].payload, b"012345");
        assert_eq!(responses[2].payload, b"6789");
        assert!(responses[3].payload.is_empty());

        // Stage 2 request left unread, image released on exit.
        assert_eq!(mock.pending_requests(), 1);
        assert_eq!(store.live(), 0);
        assert!(
            observer
                .events()
                .iter()
                .any(|e| matches!(e, FirmwareEvent::FirmwareReleased { .. }))
        );
    }

    #[test]
    fn test_failed_request_gets_error_result() {
        let mock = MockConnection::new();
        mock.queue_sync_response(GB_FIRMWARE_TYPE_AP_READY, &[]);
        mock.queue_request(GB_FIRMWARE_TYPE_GET_FIRMWARE, &chunk(0, 4));
        mock.queue_request(0x42, &[]);
        mock.queue_request(GB_FIRMWARE_TYPE_FIRMWARE_SIZE, &[GB_FIRMWARE_BOOT_STAGE_THREE]);

        let store = MemoryStore::new();
        let mut identity = identity();
        let session = FirmwareSession::with_observer(
            SessionConfig::default(),
            Arc::new(RecordingObserver::new()),
        );

        let outcome = session.serve(&mock, &store, &mut identity).unwrap();
        assert_eq!(outcome, SessionOutcome::Disconnected);

        let results: Vec<u8> = mock.responses().iter().map(|r| r.result()).collect();
        assert_eq!(results, vec![GB_OP_INVALID, GB_OP_INVALID, GB_OP_NONEXISTENT]);
        assert!(mock.responses().iter().all(|r| r.payload.is_empty()));
    }

    #[test]
    fn test_boot_failure_keeps_session_open() {
        let mock = MockConnection::new();
        mock.queue_sync_response(GB_FIRMWARE_TYPE_AP_READY, &[]);
        mock.queue_request(GB_FIRMWARE_TYPE_READY_TO_BOOT, &[GB_FIRMWARE_BOOT_STATUS_INVALID]);
        mock.queue_request(GB_FIRMWARE_TYPE_READY_TO_BOOT, &[GB_FIRMWARE_BOOT_STATUS_INSECURE]);

        let store = MemoryStore::new();
        let mut identity = identity();
        let session = FirmwareSession::with_observer(
            SessionConfig::default(),
            Arc::new(RecordingObserver::new()),
        );

        let outcome = session.serve(&mock, &store, &mut identity).unwrap();
        assert_eq!(outcome, SessionOutcome::Booted(BootStatus::Insecure));
        let results: Vec<u8> = mock.responses().iter().map(|r| r.result()).collect();
        assert_eq!(results, vec![GB_OP_INVALID, GB_OP_SUCCESS]);
    }

    #[test]
    fn test_unidirectional_request_not_answered() {
        let mock = MockConnection::new();
        mock.queue_sync_response(GB_FIRMWARE_TYPE_AP_READY, &[]);
        mock.queue_unidirectional(GB_FIRMWARE_TYPE_FIRMWARE_SIZE, &[1]);

        let store = MemoryStore::new();
        let mut identity = identity();
        store.insert(firmware_name(&identity, 1), vec![0; 8]);
        let session = FirmwareSession::with_observer(
            SessionConfig::default(),
            Arc::new(RecordingObserver::new()),
        );

        let outcome = session.serve(&mock, &store, &mut identity).unwrap();
        assert_eq!(outcome, SessionOutcome::Disconnected);
        assert!(mock.responses().is_empty());
        assert_eq!(store.loads(), 1);
        assert_eq!(store.live(), 0);
    }

    #[test]
    fn test_request_limit() {
        let mock = MockConnection::new();
        mock.queue_sync_response(GB_FIRMWARE_TYPE_AP_READY, &[]);
        for _ in 0..5 {
            mock.queue_request(GB_FIRMWARE_TYPE_GET_FIRMWARE, &chunk(0, 1));
        }

        let store = MemoryStore::new();
        let mut identity = identity();
        let config = SessionConfig {
            max_requests: Some(2),
            ..Default::default()
        };
        let session = FirmwareSession::with_observer(config, Arc::new(RecordingObserver::new()));

        let outcome = session.serve(&mock, &store, &mut identity).unwrap();
        assert_eq!(outcome, SessionOutcome::RequestLimit);
        assert_eq!(mock.responses().len(), 2);
        assert_eq!(mock.pending_requests(), 3);
    }

    #[test]
    fn test_handshake_failure_is_error() {
        let mock = MockConnection::new();
        mock.queue_request(GB_FIRMWARE_TYPE_FIRMWARE_SIZE, &[1]);

        let store = MemoryStore::new();
        let mut identity = identity();
        let session = FirmwareSession::with_observer(
            SessionConfig::default(),
            Arc::new(RecordingObserver::new()),
        );

        let err = session.serve(&mock, &store, &mut identity).unwrap_err();
        assert!(err.to_string().contains("AP_READY"));
        assert!(mock.responses().is_empty());
    }
}
