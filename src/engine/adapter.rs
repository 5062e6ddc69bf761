//! Capability traits wrapping the real-time media engine
//!
//! The session core only ever talks to the engine through these traits.
//! Capture, encoding, transport and congestion control live behind them.

use async_trait::async_trait;

use super::types::{
    ChannelId, ClientConfig, EngineEvents, LocalIdentity, MediaKind, ParticipantId, SurfaceId,
};
use crate::error::EngineError;

/// Factory for clients and local capture tracks
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Create a client for a single channel membership
    fn create_client(&self, config: &ClientConfig) -> Box<dyn EngineClient>;

    /// Open the default microphone
    async fn create_microphone_track(&self) -> Result<Box<dyn LocalTrack>, EngineError>;

    /// Open the default camera
    async fn create_camera_track(&self) -> Result<Box<dyn LocalTrack>, EngineError>;
}

/// One channel membership
#[async_trait]
pub trait EngineClient: Send {
    /// Join `channel`. With `identity == None` the engine assigns one.
    /// Returns the identity actually used.
    async fn join(
        &mut self,
        app_id: &str,
        channel: &ChannelId,
        token: &str,
        identity: Option<LocalIdentity>,
    ) -> Result<LocalIdentity, EngineError>;

    /// Leave the channel. Unpublishes everything this client published.
    async fn leave(&mut self) -> Result<(), EngineError>;

    async fn publish(&mut self, tracks: &[&dyn LocalTrack]) -> Result<(), EngineError>;

    async fn subscribe(
        &mut self,
        participant: &ParticipantId,
        kind: MediaKind,
    ) -> Result<(), EngineError>;

    /// Start playback of a subscribed remote track. Video needs a surface.
    fn play_remote(
        &mut self,
        participant: &ParticipantId,
        kind: MediaKind,
        surface: Option<&SurfaceId>,
    ) -> Result<(), EngineError>;

    fn stop_remote(&mut self, participant: &ParticipantId, kind: MediaKind);

    /// Take the participant event stream. Yields `Some` once.
    fn take_events(&mut self) -> Option<EngineEvents>;
}

/// Handle to a local capture track
#[async_trait]
pub trait LocalTrack: Send + Sync {
    fn kind(&self) -> MediaKind;

    async fn set_enabled(&self, enabled: bool) -> Result<(), EngineError>;

    /// Render the track locally (preview)
    fn play(&self, surface: &SurfaceId) -> Result<(), EngineError>;

    /// Release the capture device. Idempotent.
    fn close(&self);
}
