//! Mock transport for testing.
//!
//! Captures sent frames and connection requests for verification.

use super::{Transport, TransportError};
use async_trait::async_trait;
use duel_types::{EndpointId, Frame, SessionId};
use std::sync::{Arc, Mutex};

/// Mock transport for testing.
///
/// Every send succeeds (unless a failure is queued) and is recorded.
#[derive(Debug)]
pub struct MockTransport {
    local: EndpointId,
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    sent: Vec<(EndpointId, Vec<u8>)>,
    connection_requests: Vec<EndpointId>,
    disconnects: Vec<EndpointId>,
    advertising: Option<SessionId>,
    discovering: bool,
    fail_next_send: Option<String>,
}

impl MockTransport {
    /// Create a new mock transport with the given local endpoint id.
    pub fn new(local: &str) -> Self {
        Self {
            local: EndpointId::new(local),
            inner: Arc::new(Mutex::new(MockTransportInner::default())),
        }
    }

    /// All raw sends, in order.
    pub fn sent(&self) -> Vec<(EndpointId, Vec<u8>)> {
        let inner = self.inner.lock().unwrap();
        inner.sent.clone()
    }

    /// All sends parsed as frames (unparseable sends are skipped).
    pub fn sent_frames(&self) -> Vec<Frame> {
        self.sent()
            .iter()
            .filter_map(|(_, bytes)| Frame::from_bytes(bytes).ok())
            .collect()
    }

    /// The last frame that was sent.
    pub fn last_frame(&self) -> Option<Frame> {
        self.sent_frames().pop()
    }

    /// Endpoints we asked to connect to, in order.
    pub fn connection_requests(&self) -> Vec<EndpointId> {
        let inner = self.inner.lock().unwrap();
        inner.connection_requests.clone()
    }

    /// Endpoints we disconnected from, in order.
    pub fn disconnects(&self) -> Vec<EndpointId> {
        let inner = self.inner.lock().unwrap();
        inner.disconnects.clone()
    }

    /// Session id passed to `start_advertising`, if called.
    pub fn advertised_session(&self) -> Option<SessionId> {
        let inner = self.inner.lock().unwrap();
        inner.advertising
    }

    /// Whether `start_discovery` was called.
    pub fn is_discovering(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.discovering
    }

    /// Cause the next send to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_send = Some(error.to_string());
    }

    /// Forget recorded traffic.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.sent.clear();
        inner.connection_requests.clear();
        inner.disconnects.clear();
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            local: self.local.clone(),
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn local_endpoint(&self) -> EndpointId {
        self.local.clone()
    }

    async fn send_raw(&self, endpoint: &EndpointId, data: &[u8]) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();

        // Check for forced failure
        if let Some(error) = inner.fail_next_send.take() {
            return Err(TransportError::SendFailed(error));
        }

        inner.sent.push((endpoint.clone(), data.to_vec()));
        Ok(())
    }

    async fn request_connection(&self, endpoint: &EndpointId) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.connection_requests.push(endpoint.clone());
        Ok(())
    }

    async fn start_advertising(&self, session: SessionId) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.advertising = Some(session);
        Ok(())
    }

    async fn start_discovery(&self) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.discovering = true;
        Ok(())
    }

    async fn disconnect(&self, endpoint: &EndpointId) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.disconnects.push(endpoint.clone());
        Ok(())
    }
}
