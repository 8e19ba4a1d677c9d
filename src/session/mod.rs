//! Session orchestration
//!
//! The controller owns one connection's worth of audio state: the playback
//! scheduler, the current modulation profile, and the transport handle. All
//! routing runs on a single task, so none of that state needs locking; the
//! mixer alone is shared with the output device's callback.
//!
//! Data flow while connected:
//!
//! ```text
//! microphone ─▸ codec::to_linear_pcm ─▸ codec::encode ─▸ transport
//! transport ─▸ codec::decode ─▸ codec::to_normalized ─▸ scheduler
//!      └─ transcript ─▸ prosody::analyze ─▸ profile for the next chunk
//! ```

mod live;

pub use live::{parse_server_message, LiveSession, ServerEvent, SessionSetup};

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::audio::{codec, voice_energy, Mixer, OutputTap, PlaybackScheduler, WirePayload};
use crate::config::Config;
use crate::persona::Persona;
use crate::prosody::{self, ModulationProfile};
use crate::{Error, Result};

/// Externally observable connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// No session; devices released
    Disconnected,
    /// Dialing the remote service
    Connecting,
    /// Streaming in both directions
    Connected,
    /// Device or session failure; an explicit reconnect is required
    Error,
}

/// The remote end of a live session
///
/// [`LiveSession`] is the production implementation; tests substitute an
/// in-memory fake.
#[async_trait]
pub trait SessionTransport: Send {
    /// Queue an encoded microphone payload for the remote session
    async fn send_audio(&self, payload: WirePayload) -> Result<()>;

    /// Queue a text message (idle nudges)
    async fn send_text(&self, text: &str) -> Result<()>;

    /// Next inbound event; `None` once the channel has closed
    async fn next_event(&mut self) -> Option<ServerEvent>;

    /// Close the session gracefully
    async fn close(&mut self);
}

enum Step {
    Frame(Option<Vec<f32>>),
    Event(Option<ServerEvent>),
    IdleTick,
}

/// Orchestrates capture routing, playback scheduling, and session lifecycle
pub struct SessionController<T: SessionTransport> {
    transport: Option<T>,
    scheduler: PlaybackScheduler,
    profile: ModulationProfile,
    idle_nudge_interval: Duration,
    voice_energy_threshold: f32,
    status_tx: watch::Sender<Status>,
}

impl<T: SessionTransport> SessionController<T> {
    /// Create a controller in the disconnected state
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let (status_tx, _) = watch::channel(Status::Disconnected);
        Self {
            transport: None,
            scheduler: PlaybackScheduler::new(),
            profile: ModulationProfile::default(),
            idle_nudge_interval: config.idle_nudge_interval,
            voice_energy_threshold: config.voice_energy_threshold,
            status_tx,
        }
    }

    /// Current connection status
    #[must_use]
    pub fn status(&self) -> Status {
        *self.status_tx.borrow()
    }

    /// Subscribe to status changes
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<Status> {
        self.status_tx.subscribe()
    }

    /// Shared mixer handle for an output stream to drain
    #[must_use]
    pub fn mixer(&self) -> Arc<Mutex<Mixer>> {
        self.scheduler.mixer()
    }

    /// Read-only tap on the output chain, for the visualizer
    #[must_use]
    pub fn tap(&self) -> OutputTap {
        self.scheduler.tap()
    }

    /// Number of playback units still scheduled or playing
    #[must_use]
    pub fn active_units(&self) -> usize {
        self.scheduler.active_units()
    }

    /// The modulation profile the next audio chunk will play under
    #[must_use]
    pub const fn current_profile(&self) -> ModulationProfile {
        self.profile
    }

    /// Establish a session via `dial` and transition to connected
    ///
    /// `dial` covers everything that must succeed before audio can flow:
    /// device acquisition as well as the remote handshake. Either kind of
    /// failure lands in [`Status::Error`].
    ///
    /// # Errors
    ///
    /// Returns the dial error after transitioning to [`Status::Error`];
    /// no automatic retry happens, the caller reconnects explicitly.
    pub async fn connect_with<F, Fut>(&mut self, dial: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if matches!(self.status(), Status::Connecting | Status::Connected) {
            return Err(Error::Session("already connected".to_string()));
        }

        self.set_status(Status::Connecting);

        match dial().await {
            Ok(transport) => {
                self.transport = Some(transport);
                self.profile = ModulationProfile::default();
                let now = self.scheduler.now();
                self.scheduler.interrupt_all(now);
                self.set_status(Status::Connected);
                Ok(())
            }
            Err(e) => {
                self.set_status(Status::Error);
                Err(e)
            }
        }
    }

    /// Route traffic until the session ends
    ///
    /// Services three sources on one task: capture frames, inbound server
    /// events, and the idle-nudge timer. Returns `Ok` after a clean remote
    /// close (or capture shutdown) and `Err` when a send fails; either way
    /// the controller has already torn the session down.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Session`] if called while not connected or when an
    /// outbound send is rejected.
    pub async fn run(&mut self, frames: &mut mpsc::Receiver<Vec<f32>>) -> Result<()> {
        if self.status() != Status::Connected {
            return Err(Error::Session("cannot run: not connected".to_string()));
        }

        let mut idle = interval_at(
            Instant::now() + self.idle_nudge_interval,
            self.idle_nudge_interval,
        );
        idle.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let step = {
                let transport = self
                    .transport
                    .as_mut()
                    .ok_or_else(|| Error::Session("transport missing".to_string()))?;
                tokio::select! {
                    frame = frames.recv() => Step::Frame(frame),
                    event = transport.next_event() => Step::Event(event),
                    _ = idle.tick() => Step::IdleTick,
                }
            };

            match step {
                Step::Frame(Some(frame)) => {
                    if voice_energy(&frame) > self.voice_energy_threshold {
                        idle.reset();
                    }
                    if let Err(e) = self.send_frame(&frame).await {
                        tracing::error!(error = %e, "outbound send failed");
                        self.teardown(Status::Error).await;
                        return Err(e);
                    }
                }
                Step::Frame(None) => {
                    tracing::info!("capture channel ended");
                    self.teardown(Status::Disconnected).await;
                    return Ok(());
                }
                Step::Event(Some(event)) => {
                    idle.reset();
                    self.handle_server_event(event)?;
                }
                Step::Event(None) => {
                    tracing::info!("remote closed the session");
                    self.teardown(Status::Disconnected).await;
                    return Ok(());
                }
                Step::IdleTick => {
                    let nudge = Persona::idle_nudge(&mut rand::thread_rng());
                    tracing::debug!("conversation idle, nudging");
                    if let Err(e) = self.send_text(&nudge).await {
                        tracing::error!(error = %e, "idle nudge failed");
                        self.teardown(Status::Error).await;
                        return Err(e);
                    }
                }
            }
        }
    }

    /// Dispatch one inbound server event
    ///
    /// This is the single mutation path for audio state while connected,
    /// invoked in arrival order by [`Self::run`]. Codec failures drop the
    /// offending chunk and leave the session running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Session`] when invoked while not connected; no
    /// scheduling is accepted between disconnect and the next connect.
    pub fn handle_server_event(&mut self, event: ServerEvent) -> Result<()> {
        if self.status() != Status::Connected {
            return Err(Error::Session("not connected".to_string()));
        }

        match event {
            ServerEvent::Audio { payload } => {
                let pcm = match codec::decode(&payload) {
                    Ok(pcm) => pcm,
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping malformed audio payload");
                        return Ok(());
                    }
                };
                if pcm.is_empty() {
                    return Ok(());
                }
                let samples = codec::to_normalized(&pcm);
                let now = self.scheduler.now();
                if let Err(e) = self.scheduler.schedule_next(&samples, &self.profile, now) {
                    tracing::warn!(error = %e, "dropping audio chunk");
                }
            }
            ServerEvent::Transcript { text } => {
                self.profile = prosody::analyze(&text);
                tracing::trace!(
                    rate = self.profile.rate,
                    volume = self.profile.volume,
                    "updated modulation profile"
                );
            }
            ServerEvent::Interrupted => {
                let now = self.scheduler.now();
                self.scheduler.interrupt_all(now);
            }
            ServerEvent::TurnComplete => {
                tracing::trace!("remote turn complete");
            }
            ServerEvent::SetupComplete => {}
            ServerEvent::Error { message } => {
                tracing::warn!(%message, "server reported an error");
            }
        }

        Ok(())
    }

    /// Tear the session down and return to the disconnected state
    ///
    /// Safe to call in any state; repeated calls are no-ops. Playback is
    /// cut immediately so no stale audio outlives the session.
    pub async fn disconnect(&mut self) {
        self.teardown(Status::Disconnected).await;
    }

    async fn send_frame(&mut self, frame: &[f32]) -> Result<()> {
        let pcm = codec::to_linear_pcm(frame);
        let payload = codec::encode(&pcm);
        self.transport
            .as_ref()
            .ok_or_else(|| Error::Session("transport missing".to_string()))?
            .send_audio(payload)
            .await
    }

    async fn send_text(&mut self, text: &str) -> Result<()> {
        self.transport
            .as_ref()
            .ok_or_else(|| Error::Session("transport missing".to_string()))?
            .send_text(text)
            .await
    }

    async fn teardown(&mut self, status: Status) {
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        let now = self.scheduler.now();
        self.scheduler.interrupt_all(now);
        self.profile = ModulationProfile::default();
        self.set_status(status);
    }

    fn set_status(&mut self, status: Status) {
        if *self.status_tx.borrow() != status {
            tracing::info!(?status, "session status changed");
        }
        self.status_tx.send_replace(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullTransport;

    #[async_trait]
    impl SessionTransport for NullTransport {
        async fn send_audio(&self, _payload: WirePayload) -> Result<()> {
            Ok(())
        }

        async fn send_text(&self, _text: &str) -> Result<()> {
            Ok(())
        }

        async fn next_event(&mut self) -> Option<ServerEvent> {
            std::future::pending().await
        }

        async fn close(&mut self) {}
    }

    fn test_config() -> Config {
        Config {
            api_key: Some("test".into()),
            model: "test-model".into(),
            voice_name: "Fenrir".into(),
            idle_nudge_interval: Duration::from_secs(25),
            voice_energy_threshold: 0.01,
        }
    }

    fn audio_event(samples: usize) -> ServerEvent {
        let pcm = vec![1000i16; samples];
        ServerEvent::Audio {
            payload: codec::encode(&pcm),
        }
    }

    #[tokio::test]
    async fn connect_transitions_to_connected() {
        let mut controller = SessionController::new(&test_config());
        assert_eq!(controller.status(), Status::Disconnected);

        controller
            .connect_with(|| async { Ok(NullTransport) })
            .await
            .unwrap();
        assert_eq!(controller.status(), Status::Connected);
    }

    #[tokio::test]
    async fn failed_dial_transitions_to_error() {
        let mut controller: SessionController<NullTransport> =
            SessionController::new(&test_config());

        let result = controller
            .connect_with(|| async { Err(Error::Session("refused".to_string())) })
            .await;
        assert!(result.is_err());
        assert_eq!(controller.status(), Status::Error);
    }

    #[tokio::test]
    async fn audio_events_schedule_units() {
        let mut controller = SessionController::new(&test_config());
        controller
            .connect_with(|| async { Ok(NullTransport) })
            .await
            .unwrap();

        for _ in 0..3 {
            controller.handle_server_event(audio_event(240)).unwrap();
        }
        assert_eq!(controller.active_units(), 3);
    }

    #[tokio::test]
    async fn transcript_updates_profile_for_next_chunk() {
        let mut controller = SessionController::new(&test_config());
        controller
            .connect_with(|| async { Ok(NullTransport) })
            .await
            .unwrap();

        controller
            .handle_server_event(ServerEvent::Transcript {
                text: "this is a dark web secret".to_string(),
            })
            .unwrap();

        let profile = controller.current_profile();
        assert!(profile.volume <= 0.4);
        assert!(profile.tonal_cutoff.unwrap() <= 2500.0);
    }

    #[tokio::test]
    async fn interruption_clears_active_units() {
        let mut controller = SessionController::new(&test_config());
        controller
            .connect_with(|| async { Ok(NullTransport) })
            .await
            .unwrap();

        controller.handle_server_event(audio_event(240)).unwrap();
        controller.handle_server_event(audio_event(240)).unwrap();
        assert_eq!(controller.active_units(), 2);

        controller
            .handle_server_event(ServerEvent::Interrupted)
            .unwrap();
        assert_eq!(controller.active_units(), 0);

        // Idempotent when nothing is playing
        controller
            .handle_server_event(ServerEvent::Interrupted)
            .unwrap();
        assert_eq!(controller.active_units(), 0);
    }

    #[tokio::test]
    async fn malformed_payload_is_dropped_not_fatal() {
        let mut controller = SessionController::new(&test_config());
        controller
            .connect_with(|| async { Ok(NullTransport) })
            .await
            .unwrap();

        controller
            .handle_server_event(ServerEvent::Audio {
                payload: WirePayload {
                    data: "@@not-base64@@".to_string(),
                    mime_type: "audio/pcm;rate=24000".to_string(),
                },
            })
            .unwrap();
        assert_eq!(controller.active_units(), 0);

        // Session keeps processing afterwards
        controller.handle_server_event(audio_event(240)).unwrap();
        assert_eq!(controller.active_units(), 1);
    }

    #[tokio::test]
    async fn disconnect_clears_state_and_refuses_scheduling() {
        let mut controller = SessionController::new(&test_config());
        controller
            .connect_with(|| async { Ok(NullTransport) })
            .await
            .unwrap();

        for _ in 0..3 {
            controller.handle_server_event(audio_event(240)).unwrap();
        }
        assert_eq!(controller.active_units(), 3);

        controller.disconnect().await;
        assert_eq!(controller.status(), Status::Disconnected);
        assert_eq!(controller.active_units(), 0);

        // No scheduling accepted until a new connect
        assert!(controller.handle_server_event(audio_event(240)).is_err());

        // Disconnect is safe to repeat
        controller.disconnect().await;
        assert_eq!(controller.status(), Status::Disconnected);
    }

    #[tokio::test]
    async fn reconnect_after_disconnect_accepts_audio_again() {
        let mut controller = SessionController::new(&test_config());
        controller
            .connect_with(|| async { Ok(NullTransport) })
            .await
            .unwrap();
        controller.disconnect().await;

        controller
            .connect_with(|| async { Ok(NullTransport) })
            .await
            .unwrap();
        controller.handle_server_event(audio_event(240)).unwrap();
        assert_eq!(controller.active_units(), 1);
    }
}
