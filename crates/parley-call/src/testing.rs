//! Scripted peer connection and observer for tests.

use async_trait::async_trait;
use parley_protocol::{IceCandidate, SessionDescription};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::connection::{ConnectionError, PeerConnection};
use crate::relay::{CallObserver, CallState};

/// Everything a [`MockConnection`] was asked to do.
pub struct ConnectionLog {
    pub media_started: bool,
    pub offers_created: usize,
    pub answers_created: usize,
    pub remote_descriptions: Vec<SessionDescription>,
    pub applied_candidates: Vec<IceCandidate>,
    pub close_count: usize,
    pub fail_remote_description: bool,
    /// Feeds the connection's local candidate stream.
    pub local_candidates: mpsc::UnboundedSender<IceCandidate>,
}

pub type SharedLog = Arc<Mutex<ConnectionLog>>;

pub struct MockConnection {
    log: SharedLog,
    candidates: Option<mpsc::UnboundedReceiver<IceCandidate>>,
}

impl MockConnection {
    pub fn new() -> (Self, SharedLog) {
        let (tx, rx) = mpsc::unbounded_channel();
        let log = Arc::new(Mutex::new(ConnectionLog {
            media_started: false,
            offers_created: 0,
            answers_created: 0,
            remote_descriptions: Vec::new(),
            applied_candidates: Vec::new(),
            close_count: 0,
            fail_remote_description: false,
            local_candidates: tx,
        }));
        let connection = Self {
            log: log.clone(),
            candidates: Some(rx),
        };
        (connection, log)
    }
}

#[async_trait]
impl PeerConnection for MockConnection {
    async fn start_local_media(&mut self) -> Result<(), ConnectionError> {
        self.log.lock().unwrap().media_started = true;
        Ok(())
    }

    async fn create_offer(&mut self) -> Result<SessionDescription, ConnectionError> {
        let mut log = self.log.lock().unwrap();
        log.offers_created += 1;
        Ok(SessionDescription::offer(format!("v=0 offer {}", log.offers_created)))
    }

    async fn create_answer(&mut self) -> Result<SessionDescription, ConnectionError> {
        let mut log = self.log.lock().unwrap();
        if log.remote_descriptions.is_empty() {
            return Err(ConnectionError::new("create_answer", "no remote offer"));
        }
        log.answers_created += 1;
        Ok(SessionDescription::answer(format!("v=0 answer {}", log.answers_created)))
    }

    async fn set_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), ConnectionError> {
        let mut log = self.log.lock().unwrap();
        if log.fail_remote_description {
            return Err(ConnectionError::new("set_remote_description", "malformed sdp"));
        }
        log.remote_descriptions.push(description);
        Ok(())
    }

    fn has_remote_description(&self) -> bool {
        !self.log.lock().unwrap().remote_descriptions.is_empty()
    }

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), ConnectionError> {
        let mut log = self.log.lock().unwrap();
        if log.remote_descriptions.is_empty() {
            return Err(ConnectionError::new("add_ice_candidate", "no remote description"));
        }
        log.applied_candidates.push(candidate);
        Ok(())
    }

    fn take_local_candidates(&mut self) -> Option<mpsc::UnboundedReceiver<IceCandidate>> {
        self.candidates.take()
    }

    async fn close(&mut self) {
        self.log.lock().unwrap().close_count += 1;
    }
}

/// Observer that records transitions into shared state.
#[derive(Clone, Default)]
pub struct RecordingObserver {
    inner: Arc<Mutex<(Vec<CallState>, usize)>>,
}

impl RecordingObserver {
    /// States entered, in order.
    pub fn states(&self) -> Vec<CallState> {
        self.inner.lock().unwrap().0.clone()
    }

    pub fn exit_count(&self) -> usize {
        self.inner.lock().unwrap().1
    }

    pub fn reached(&self, state: CallState) -> bool {
        self.states().contains(&state)
    }
}

impl CallObserver for RecordingObserver {
    fn on_state_change(&mut self, _from: CallState, to: CallState) {
        self.inner.lock().unwrap().0.push(to);
    }

    fn on_exit(&mut self) {
        self.inner.lock().unwrap().1 += 1;
    }
}
