//! In-process media engine
//!
//! Implements the adapter traits entirely in memory. Every call is recorded
//! in order, open tracks and channel memberships are tracked so leaks can be
//! counted, and individual steps can be made to fail. Remote peers are
//! simulated with [`SimulatedEngine::publish_remote`] and
//! [`SimulatedEngine::unpublish_remote`].

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::adapter::{EngineClient, LocalTrack, MediaEngine};
use super::types::{
    ChannelId, ClientConfig, EngineEvent, EngineEvents, LocalIdentity, MediaKind, ParticipantId,
    SurfaceId,
};
use crate::error::EngineError;

/// Engine step that can be made to fail
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Join,
    Leave,
    Microphone,
    Camera,
    Publish,
    Subscribe(ParticipantId, MediaKind),
    SetEnabled(MediaKind),
    RenderVideo,
}

/// One recorded engine call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    CreateClient(ClientConfig),
    Join {
        channel: ChannelId,
        identity: LocalIdentity,
    },
    Leave,
    CreateMicrophone,
    CreateCamera,
    Publish(Vec<MediaKind>),
    Subscribe(ParticipantId, MediaKind),
    PlayRemote(ParticipantId, MediaKind, Option<SurfaceId>),
    StopRemote(ParticipantId, MediaKind),
    PlayLocal(MediaKind, SurfaceId),
    SetEnabled(MediaKind, bool),
    CloseTrack(MediaKind),
}

#[derive(Debug, Clone)]
struct TrackRecord {
    kind: MediaKind,
    enabled: bool,
    open: bool,
}

#[derive(Default)]
struct Shared {
    calls: Mutex<Vec<EngineCall>>,
    failures: Mutex<HashSet<FailPoint>>,
    latency: Mutex<Option<Duration>>,
    tracks: DashMap<u64, TrackRecord>,
    memberships: DashMap<u64, ChannelId>,
    event_senders: Mutex<Vec<mpsc::UnboundedSender<EngineEvent>>>,
    next_id: AtomicU64,
}

impl Shared {
    fn record(&self, call: EngineCall) {
        self.calls.lock().push(call);
    }

    fn fails(&self, point: &FailPoint) -> bool {
        self.failures.lock().contains(point)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    async fn delay(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn emit(&self, event: EngineEvent) -> usize {
        let mut senders = self.event_senders.lock();
        senders.retain(|tx| tx.send(event.clone()).is_ok());
        senders.len()
    }
}

/// In-memory [`MediaEngine`]
#[derive(Clone, Default)]
pub struct SimulatedEngine {
    shared: Arc<Shared>,
}

impl SimulatedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every async engine step by `latency`
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.shared.latency.lock() = Some(latency);
        self
    }

    /// Make `point` fail until cleared
    pub fn fail_on(&self, point: FailPoint) {
        self.shared.failures.lock().insert(point);
    }

    pub fn clear_failure(&self, point: &FailPoint) {
        self.shared.failures.lock().remove(point);
    }

    /// Remote peer starts publishing. Returns the number of live clients notified.
    pub fn publish_remote(&self, participant: impl Into<ParticipantId>, kind: MediaKind) -> usize {
        self.shared.emit(EngineEvent::ParticipantPublished {
            participant: participant.into(),
            kind,
        })
    }

    /// Remote peer stops publishing. Returns the number of live clients notified.
    pub fn unpublish_remote(
        &self,
        participant: impl Into<ParticipantId>,
        kind: MediaKind,
    ) -> usize {
        self.shared.emit(EngineEvent::ParticipantUnpublished {
            participant: participant.into(),
            kind,
        })
    }

    /// All engine calls so far, in order
    pub fn calls(&self) -> Vec<EngineCall> {
        self.shared.calls.lock().clone()
    }

    /// Number of recorded calls matching `pred`
    pub fn count_calls(&self, pred: impl Fn(&EngineCall) -> bool) -> usize {
        self.shared.calls.lock().iter().filter(|c| pred(c)).count()
    }

    pub fn open_tracks(&self) -> usize {
        self.shared.tracks.iter().filter(|t| t.open).count()
    }

    pub fn open_memberships(&self) -> usize {
        self.shared.memberships.len()
    }

    /// Open tracks plus channel memberships still held
    pub fn open_resources(&self) -> usize {
        self.open_tracks() + self.open_memberships()
    }

    /// Enabled flag of the open track of `kind`, if one is open
    pub fn track_enabled(&self, kind: MediaKind) -> Option<bool> {
        self.shared
            .tracks
            .iter()
            .find(|t| t.open && t.kind == kind)
            .map(|t| t.enabled)
    }

    fn new_track(&self, kind: MediaKind) -> Box<dyn LocalTrack> {
        let id = self.shared.next_id();
        self.shared.tracks.insert(
            id,
            TrackRecord {
                kind,
                enabled: true,
                open: true,
            },
        );
        Box::new(SimulatedTrack {
            id,
            kind,
            shared: self.shared.clone(),
        })
    }
}

#[async_trait]
impl MediaEngine for SimulatedEngine {
    fn create_client(&self, config: &ClientConfig) -> Box<dyn EngineClient> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.event_senders.lock().push(tx);
        self.shared.record(EngineCall::CreateClient(*config));

        Box::new(SimulatedClient {
            id: self.shared.next_id(),
            shared: self.shared.clone(),
            events: Some(rx),
            joined: false,
        })
    }

    async fn create_microphone_track(&self) -> Result<Box<dyn LocalTrack>, EngineError> {
        self.shared.delay().await;
        self.shared.record(EngineCall::CreateMicrophone);
        if self.shared.fails(&FailPoint::Microphone) {
            return Err(EngineError::PermissionDenied("microphone".to_string()));
        }
        Ok(self.new_track(MediaKind::Audio))
    }

    async fn create_camera_track(&self) -> Result<Box<dyn LocalTrack>, EngineError> {
        self.shared.delay().await;
        self.shared.record(EngineCall::CreateCamera);
        if self.shared.fails(&FailPoint::Camera) {
            return Err(EngineError::DeviceUnavailable("camera".to_string()));
        }
        Ok(self.new_track(MediaKind::Video))
    }
}

struct SimulatedClient {
    id: u64,
    shared: Arc<Shared>,
    events: Option<EngineEvents>,
    joined: bool,
}

#[async_trait]
impl EngineClient for SimulatedClient {
    async fn join(
        &mut self,
        _app_id: &str,
        channel: &ChannelId,
        token: &str,
        identity: Option<LocalIdentity>,
    ) -> Result<LocalIdentity, EngineError> {
        self.shared.delay().await;
        if self.shared.fails(&FailPoint::Join) {
            return Err(EngineError::Rejected(format!("token {} refused", token)));
        }

        let identity = identity.unwrap_or(LocalIdentity(self.shared.next_id() as u32));
        self.shared.record(EngineCall::Join {
            channel: channel.clone(),
            identity,
        });
        self.shared.memberships.insert(self.id, channel.clone());
        self.joined = true;
        Ok(identity)
    }

    async fn leave(&mut self) -> Result<(), EngineError> {
        self.shared.delay().await;
        self.shared.record(EngineCall::Leave);
        if self.shared.fails(&FailPoint::Leave) {
            return Err(EngineError::Unreachable("leave not acknowledged".to_string()));
        }
        self.shared.memberships.remove(&self.id);
        self.joined = false;
        Ok(())
    }

    async fn publish(&mut self, tracks: &[&dyn LocalTrack]) -> Result<(), EngineError> {
        self.shared.delay().await;
        if !self.joined {
            return Err(EngineError::NotJoined);
        }
        self.shared
            .record(EngineCall::Publish(tracks.iter().map(|t| t.kind()).collect()));
        if self.shared.fails(&FailPoint::Publish) {
            return Err(EngineError::Rejected("publish refused".to_string()));
        }
        Ok(())
    }

    async fn subscribe(
        &mut self,
        participant: &ParticipantId,
        kind: MediaKind,
    ) -> Result<(), EngineError> {
        self.shared.delay().await;
        if !self.joined {
            return Err(EngineError::NotJoined);
        }
        self.shared
            .record(EngineCall::Subscribe(participant.clone(), kind));
        if self
            .shared
            .fails(&FailPoint::Subscribe(participant.clone(), kind))
        {
            return Err(EngineError::Rejected(format!("{} not subscribable", participant)));
        }
        Ok(())
    }

    fn play_remote(
        &mut self,
        participant: &ParticipantId,
        kind: MediaKind,
        surface: Option<&SurfaceId>,
    ) -> Result<(), EngineError> {
        self.shared.record(EngineCall::PlayRemote(
            participant.clone(),
            kind,
            surface.cloned(),
        ));
        if kind == MediaKind::Video && self.shared.fails(&FailPoint::RenderVideo) {
            return Err(EngineError::Rejected("surface not renderable".to_string()));
        }
        Ok(())
    }

    fn stop_remote(&mut self, participant: &ParticipantId, kind: MediaKind) {
        self.shared
            .record(EngineCall::StopRemote(participant.clone(), kind));
    }

    fn take_events(&mut self) -> Option<EngineEvents> {
        self.events.take()
    }
}

struct SimulatedTrack {
    id: u64,
    kind: MediaKind,
    shared: Arc<Shared>,
}

#[async_trait]
impl LocalTrack for SimulatedTrack {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    async fn set_enabled(&self, enabled: bool) -> Result<(), EngineError> {
        self.shared.delay().await;
        self.shared.record(EngineCall::SetEnabled(self.kind, enabled));
        if self.shared.fails(&FailPoint::SetEnabled(self.kind)) {
            return Err(EngineError::Rejected("track state change refused".to_string()));
        }
        match self.shared.tracks.get_mut(&self.id) {
            Some(mut record) if record.open => {
                record.enabled = enabled;
                Ok(())
            }
            _ => Err(EngineError::TrackClosed),
        }
    }

    fn play(&self, surface: &SurfaceId) -> Result<(), EngineError> {
        self.shared
            .record(EngineCall::PlayLocal(self.kind, surface.clone()));
        Ok(())
    }

    fn close(&self) {
        if let Some(mut record) = self.shared.tracks.get_mut(&self.id) {
            if record.open {
                record.open = false;
                drop(record);
                self.shared.record(EngineCall::CloseTrack(self.kind));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tracks_counted_until_closed() {
        let engine = SimulatedEngine::new();
        let mic = engine.create_microphone_track().await.unwrap();
        let cam = engine.create_camera_track().await.unwrap();
        assert_eq!(engine.open_tracks(), 2);

        mic.close();
        mic.close();
        assert_eq!(engine.open_tracks(), 1);
        assert_eq!(
            engine.count_calls(|c| matches!(c, EngineCall::CloseTrack(MediaKind::Audio))),
            1
        );

        cam.close();
        assert_eq!(engine.open_resources(), 0);
    }

    #[tokio::test]
    async fn test_membership_and_events() {
        let engine = SimulatedEngine::new();
        let mut client = engine.create_client(&ClientConfig::default());
        let mut events = client.take_events().unwrap();
        assert!(client.take_events().is_none());

        let identity = client
            .join("app", &ChannelId::new("room-1"), "tok", Some(LocalIdentity(7)))
            .await
            .unwrap();
        assert_eq!(identity, LocalIdentity(7));
        assert_eq!(engine.open_memberships(), 1);

        assert_eq!(engine.publish_remote("u1", MediaKind::Audio), 1);
        assert_eq!(
            events.recv().await,
            Some(EngineEvent::ParticipantPublished {
                participant: ParticipantId::from("u1"),
                kind: MediaKind::Audio,
            })
        );

        client.leave().await.unwrap();
        assert_eq!(engine.open_memberships(), 0);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let engine = SimulatedEngine::new();
        engine.fail_on(FailPoint::Camera);
        assert!(matches!(
            engine.create_camera_track().await,
            Err(EngineError::DeviceUnavailable(_))
        ));

        engine.clear_failure(&FailPoint::Camera);
        assert!(engine.create_camera_track().await.is_ok());
    }

    #[tokio::test]
    async fn test_set_enabled_on_closed_track() {
        let engine = SimulatedEngine::new();
        let mic = engine.create_microphone_track().await.unwrap();
        mic.set_enabled(false).await.unwrap();
        assert_eq!(engine.track_enabled(MediaKind::Audio), Some(false));

        mic.close();
        assert_eq!(mic.set_enabled(true).await, Err(EngineError::TrackClosed));
    }
}
