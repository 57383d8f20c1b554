//! Public session controller backed by the driver task.
//!
//! A controller owns exactly one session: construct it with a negotiated
//! [`SessionConfig`], a frame source and a transport, start it once, then
//! either wait for the terminal result or stop early. Resetting (or
//! dropping) the controller cancels the driver task, which stops every
//! timer and tears the transport down. A new session means a new
//! negotiation and a new controller; sequence numbers never leak across
//! sessions because each driver task owns a fresh assembler.

use std::sync::Arc;

use futures::stream::BoxStream;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::driver::{Command, DriverChannels, SessionDriver};
use crate::error::{Result, SessionError};
use crate::source::FrameSource;
use crate::transport::Transport;
use crate::types::{SessionPhase, SessionResult, SessionSnapshot};

/// Handle for one capture session.
pub struct SessionController<S, T> {
    config: SessionConfig,
    source: Option<S>,
    transport: Option<T>,
    channels: Option<DriverChannels>,
}

impl<S, T> SessionController<S, T>
where
    S: FrameSource,
    T: Transport,
{
    pub fn new(config: SessionConfig, source: S, transport: T) -> Self {
        Self { config, source: Some(source), transport: Some(transport), channels: None }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current phase, [`SessionPhase::Idle`] before start and after reset.
    pub fn phase(&self) -> SessionPhase {
        self.snapshot().phase
    }

    /// Latest published snapshot, or the idle default when no session ran.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.channels
            .as_ref()
            .map(|channels| channels.snapshots.borrow().clone())
            .unwrap_or_default()
    }

    /// The terminal result, if the session has finalized.
    pub fn result(&self) -> Option<Arc<SessionResult>> {
        self.channels.as_ref().and_then(|channels| channels.result.borrow().clone())
    }

    /// Starts capturing.
    ///
    /// Fails fast, before any network resources are allocated, when the
    /// config is invalid or the frame source is not ready; a not-ready
    /// source leaves the controller startable so the caller can retry
    /// once the camera warms up.
    pub fn start(&mut self) -> Result<()> {
        if self.channels.is_some() {
            return Err(SessionError::invalid_state("start", self.phase().as_str()));
        }
        self.config.validate()?;

        let source = self
            .source
            .take()
            .ok_or_else(|| SessionError::invalid_state("start", "complete"))?;
        if !source.is_ready() {
            self.source = Some(source);
            return Err(SessionError::source_not_ready("frame source has no frames to offer"));
        }
        let transport = self
            .transport
            .take()
            .ok_or_else(|| SessionError::invalid_state("start", "complete"))?;

        info!(session_id = %self.config.session_id, "starting session");
        self.channels = Some(SessionDriver::spawn(self.config.clone(), source, transport));
        Ok(())
    }

    /// User-initiated stop: ends the session without waiting for a result.
    ///
    /// Returns an error only when no session was ever started; stopping a
    /// session that already reached a terminal phase is a no-op.
    pub fn stop(&self) -> Result<()> {
        let channels = self
            .channels
            .as_ref()
            .ok_or_else(|| SessionError::invalid_state("stop", "idle"))?;
        if channels.commands.send(Command::Stop).is_err() {
            debug!("stop requested after the session task already ended");
        }
        Ok(())
    }

    /// Cancels the running session and returns the controller to idle.
    ///
    /// Idempotent: resetting twice, or before any start, leaves the same
    /// observable idle state. No timer fires after reset.
    pub fn reset(&mut self) {
        if let Some(channels) = self.channels.take() {
            debug!(session_id = %self.config.session_id, "resetting session controller");
            channels.cancel.cancel();
        }
    }

    /// Waits for the terminal result.
    ///
    /// Resolves once the service delivers the result, or fails when the
    /// session reaches the error phase or ends without one (user stop).
    pub async fn wait_for_result(&mut self) -> Result<Arc<SessionResult>> {
        let channels = self
            .channels
            .as_mut()
            .ok_or_else(|| SessionError::invalid_state("wait_for_result", "idle"))?;

        loop {
            if let Some(result) = channels.result.borrow_and_update().clone() {
                return Ok(result);
            }
            {
                let snapshot = channels.snapshots.borrow_and_update();
                if snapshot.phase == SessionPhase::Error {
                    return Err(SessionError::session_failed(
                        snapshot.last_error.clone().unwrap_or_else(|| "session failed".to_string()),
                    ));
                }
            }

            let ended = tokio::select! {
                changed = channels.result.changed() => changed.is_err(),
                changed = channels.snapshots.changed() => changed.is_err(),
            };
            if ended {
                break;
            }
        }

        // the task is gone; read whatever it left behind
        if let Some(result) = channels.result.borrow().clone() {
            return Ok(result);
        }
        let snapshot = channels.snapshots.borrow().clone();
        if snapshot.phase == SessionPhase::Error {
            return Err(SessionError::session_failed(
                snapshot.last_error.unwrap_or_else(|| "session failed".to_string()),
            ));
        }
        Err(SessionError::session_failed("session ended without a result"))
    }

    /// Stream of live snapshots, ending when the session task does.
    pub fn updates(&self) -> BoxStream<'static, SessionSnapshot> {
        match &self.channels {
            Some(channels) => Box::pin(WatchStream::new(channels.snapshots.clone())),
            None => Box::pin(futures::stream::empty()),
        }
    }
}

impl<S, T> Drop for SessionController<S, T> {
    fn drop(&mut self) {
        if let Some(channels) = self.channels.take() {
            channels.cancel.cancel();
        }
    }
}
