//! mDNS service advertisement.
//!
//! Publishes a `_buttonbox._udp.local.` service record so handheld clients
//! can find the server without typing an IP address.  The record's TXT
//! properties carry the protocol version and a stable server id, letting
//! clients recognise the same server across restarts and address changes.
//!
//! Advertisement is best-effort: a machine without multicast (VPN-only
//! interfaces, locked-down networks) still serves clients that know the
//! address, so registration failures are reported but never stop the engine.
//!
//! The mDNS daemon is abstracted behind [`MdnsBackend`] so the state machine
//! can be tested without touching the network.

use std::collections::HashMap;

use buttonbox_core::{ServerIdentity, SERVICE_TYPE};
use thiserror::Error;
use tracing::{info, warn};

/// Error type for advertisement operations.
#[derive(Debug, Error)]
pub enum AdvertisementError {
    /// The mDNS daemon could not be created or reached.
    #[error("mDNS daemon unavailable: {0}")]
    Daemon(String),

    /// The service record was rejected.
    #[error("failed to register service record: {0}")]
    Register(String),

    /// The service record could not be withdrawn.
    #[error("failed to unregister service record: {0}")]
    Unregister(String),
}

/// Registration state of the advertised service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertiserState {
    /// No record is published.
    Unregistered,
    /// A register call is in flight.
    Registering,
    /// The record is published.
    Registered,
    /// The last register or unregister attempt failed.
    Failed,
}

/// The concrete parameters of a published record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisedService {
    pub instance_name: String,
    pub port: u16,
}

/// Minimal surface of an mDNS responder daemon.
pub trait MdnsBackend: Send {
    /// Publishes a service record.  Called at most once between unregisters.
    fn register(
        &mut self,
        instance_name: &str,
        service_type: &str,
        port: u16,
        txt: &HashMap<String, String>,
    ) -> Result<(), AdvertisementError>;

    /// Withdraws the currently published record, if any.
    fn unregister(&mut self) -> Result<(), AdvertisementError>;
}

/// State machine wrapping an [`MdnsBackend`].
///
/// `register` and `unregister` are idempotent; reconfiguring with new
/// parameters withdraws the old record first.
pub struct ServiceAdvertiser {
    backend: Box<dyn MdnsBackend>,
    state: AdvertiserState,
    current: Option<AdvertisedService>,
}

impl ServiceAdvertiser {
    pub fn new(backend: Box<dyn MdnsBackend>) -> Self {
        Self {
            backend,
            state: AdvertiserState::Unregistered,
            current: None,
        }
    }

    pub fn state(&self) -> AdvertiserState {
        self.state
    }

    /// Publishes (or republishes) the service record for `identity`.
    ///
    /// Registering with unchanged parameters while already registered is a
    /// no-op.  Changed parameters trigger an unregister/register cycle.
    pub fn register(&mut self, identity: &ServerIdentity) -> Result<(), AdvertisementError> {
        let desired = AdvertisedService {
            instance_name: identity.name.clone(),
            port: identity.port,
        };

        if self.state == AdvertiserState::Registered && self.current.as_ref() == Some(&desired) {
            return Ok(());
        }

        if self.current.is_some() {
            self.withdraw()?;
        }

        self.state = AdvertiserState::Registering;
        let mut txt = HashMap::new();
        txt.insert("protocol".to_string(), identity.protocol.to_string());
        txt.insert("serverId".to_string(), identity.server_id.to_string());

        match self
            .backend
            .register(&desired.instance_name, SERVICE_TYPE, desired.port, &txt)
        {
            Ok(()) => {
                info!(
                    "advertised {} as \"{}\" on port {}",
                    SERVICE_TYPE, desired.instance_name, desired.port
                );
                self.current = Some(desired);
                self.state = AdvertiserState::Registered;
                Ok(())
            }
            Err(e) => {
                warn!("mDNS registration failed: {e}");
                self.state = AdvertiserState::Failed;
                Err(e)
            }
        }
    }

    /// Withdraws the published record.  A no-op when nothing is registered.
    pub fn unregister(&mut self) -> Result<(), AdvertisementError> {
        if self.current.is_none() {
            self.state = AdvertiserState::Unregistered;
            return Ok(());
        }
        self.withdraw()
    }

    fn withdraw(&mut self) -> Result<(), AdvertisementError> {
        match self.backend.unregister() {
            Ok(()) => {
                info!("withdrew mDNS advertisement");
                self.current = None;
                self.state = AdvertiserState::Unregistered;
                Ok(())
            }
            Err(e) => {
                warn!("mDNS unregistration failed: {e}");
                self.state = AdvertiserState::Failed;
                Err(e)
            }
        }
    }
}

// ── mdns-sd backend ───────────────────────────────────────────────────────────

/// Production backend driving the `mdns-sd` responder daemon.
///
/// The daemon is created lazily on first registration so constructing the
/// backend never touches the network.
pub struct MdnsSdBackend {
    daemon: Option<mdns_sd::ServiceDaemon>,
    fullname: Option<String>,
}

impl MdnsSdBackend {
    pub fn new() -> Self {
        Self {
            daemon: None,
            fullname: None,
        }
    }

    fn daemon(&mut self) -> Result<&mdns_sd::ServiceDaemon, AdvertisementError> {
        if self.daemon.is_none() {
            let daemon = mdns_sd::ServiceDaemon::new()
                .map_err(|e| AdvertisementError::Daemon(e.to_string()))?;
            self.daemon = Some(daemon);
        }
        // The branch above guarantees Some.
        self.daemon
            .as_ref()
            .ok_or_else(|| AdvertisementError::Daemon("daemon unavailable".to_string()))
    }
}

impl Default for MdnsSdBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MdnsBackend for MdnsSdBackend {
    fn register(
        &mut self,
        instance_name: &str,
        service_type: &str,
        port: u16,
        txt: &HashMap<String, String>,
    ) -> Result<(), AdvertisementError> {
        let host_name = format!("{}.local.", instance_name.replace(' ', "-"));
        let info = mdns_sd::ServiceInfo::new(
            service_type,
            instance_name,
            &host_name,
            "",
            port,
            txt.clone(),
        )
        .map_err(|e| AdvertisementError::Register(e.to_string()))?
        .enable_addr_auto();

        let fullname = info.get_fullname().to_string();
        self.daemon()?
            .register(info)
            .map_err(|e| AdvertisementError::Register(e.to_string()))?;
        self.fullname = Some(fullname);
        Ok(())
    }

    fn unregister(&mut self) -> Result<(), AdvertisementError> {
        let fullname = match self.fullname.take() {
            Some(name) => name,
            None => return Ok(()),
        };
        let daemon = match &self.daemon {
            Some(daemon) => daemon,
            None => return Ok(()),
        };
        daemon
            .unregister(&fullname)
            .map_err(|e| AdvertisementError::Unregister(e.to_string()))?;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use buttonbox_core::PROTOCOL_VERSION;
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    /// Records every backend call and fails on demand.
    #[derive(Default)]
    struct FakeBackendState {
        registrations: Vec<(String, String, u16, HashMap<String, String>)>,
        unregistrations: usize,
        fail_register: bool,
        fail_unregister: bool,
    }

    #[derive(Clone, Default)]
    struct FakeBackend {
        state: Arc<Mutex<FakeBackendState>>,
    }

    impl MdnsBackend for FakeBackend {
        fn register(
            &mut self,
            instance_name: &str,
            service_type: &str,
            port: u16,
            txt: &HashMap<String, String>,
        ) -> Result<(), AdvertisementError> {
            let mut state = self.state.lock().unwrap();
            if state.fail_register {
                return Err(AdvertisementError::Register("forced failure".to_string()));
            }
            state.registrations.push((
                instance_name.to_string(),
                service_type.to_string(),
                port,
                txt.clone(),
            ));
            Ok(())
        }

        fn unregister(&mut self) -> Result<(), AdvertisementError> {
            let mut state = self.state.lock().unwrap();
            if state.fail_unregister {
                return Err(AdvertisementError::Unregister("forced failure".to_string()));
            }
            state.unregistrations += 1;
            Ok(())
        }
    }

    fn identity(name: &str, port: u16) -> ServerIdentity {
        ServerIdentity {
            name: name.to_string(),
            port,
            protocol: PROTOCOL_VERSION,
            server_id: Uuid::nil(),
        }
    }

    #[test]
    fn test_register_publishes_record_with_txt_properties() {
        // Arrange
        let backend = FakeBackend::default();
        let state = Arc::clone(&backend.state);
        let mut advertiser = ServiceAdvertiser::new(Box::new(backend));

        // Act
        advertiser.register(&identity("office-pc", 5005)).unwrap();

        // Assert
        assert_eq!(advertiser.state(), AdvertiserState::Registered);
        let state = state.lock().unwrap();
        let (instance, service_type, port, txt) = &state.registrations[0];
        assert_eq!(instance, "office-pc");
        assert_eq!(service_type, SERVICE_TYPE);
        assert_eq!(*port, 5005);
        assert_eq!(txt.get("protocol"), Some(&PROTOCOL_VERSION.to_string()));
        assert!(txt.contains_key("serverId"));
    }

    #[test]
    fn test_register_is_idempotent_for_same_parameters() {
        let backend = FakeBackend::default();
        let state = Arc::clone(&backend.state);
        let mut advertiser = ServiceAdvertiser::new(Box::new(backend));

        advertiser.register(&identity("office-pc", 5005)).unwrap();
        advertiser.register(&identity("office-pc", 5005)).unwrap();

        assert_eq!(state.lock().unwrap().registrations.len(), 1);
    }

    #[test]
    fn test_register_with_new_port_withdraws_old_record_first() {
        let backend = FakeBackend::default();
        let state = Arc::clone(&backend.state);
        let mut advertiser = ServiceAdvertiser::new(Box::new(backend));

        advertiser.register(&identity("office-pc", 5005)).unwrap();
        advertiser.register(&identity("office-pc", 5006)).unwrap();

        let state = state.lock().unwrap();
        assert_eq!(state.unregistrations, 1);
        assert_eq!(state.registrations.len(), 2);
        assert_eq!(state.registrations[1].2, 5006);
    }

    #[test]
    fn test_register_failure_moves_to_failed_state() {
        let backend = FakeBackend::default();
        backend.state.lock().unwrap().fail_register = true;
        let mut advertiser = ServiceAdvertiser::new(Box::new(backend));

        let result = advertiser.register(&identity("office-pc", 5005));

        assert!(result.is_err());
        assert_eq!(advertiser.state(), AdvertiserState::Failed);
    }

    #[test]
    fn test_reconfigure_with_failing_register_withdraws_and_fails() {
        // Arrange: the first registration succeeds, the replacement does not.
        let backend = FakeBackend::default();
        let state = Arc::clone(&backend.state);
        let mut advertiser = ServiceAdvertiser::new(Box::new(backend));
        advertiser.register(&identity("office-pc", 5005)).unwrap();
        state.lock().unwrap().fail_register = true;

        // Act
        let result = advertiser.register(&identity("office-pc", 5006));

        // Assert: the old record was withdrawn and the state reflects the
        // failed re-registration.
        assert!(result.is_err());
        assert_eq!(advertiser.state(), AdvertiserState::Failed);
        assert_eq!(state.lock().unwrap().unregistrations, 1);
    }

    #[test]
    fn test_unregister_without_registration_is_a_noop() {
        let backend = FakeBackend::default();
        let state = Arc::clone(&backend.state);
        let mut advertiser = ServiceAdvertiser::new(Box::new(backend));

        advertiser.unregister().unwrap();

        assert_eq!(advertiser.state(), AdvertiserState::Unregistered);
        assert_eq!(state.lock().unwrap().unregistrations, 0);
    }

    #[test]
    fn test_failed_registration_can_be_retried() {
        let backend = FakeBackend::default();
        let state = Arc::clone(&backend.state);
        state.lock().unwrap().fail_register = true;
        let mut advertiser = ServiceAdvertiser::new(Box::new(backend));

        assert!(advertiser.register(&identity("office-pc", 5005)).is_err());
        state.lock().unwrap().fail_register = false;
        advertiser.register(&identity("office-pc", 5005)).unwrap();

        assert_eq!(advertiser.state(), AdvertiserState::Registered);
    }
}
