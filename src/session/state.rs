//! Authoritative record of one call

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::engine::{
    ChannelId, EngineClient, LocalIdentity, LocalTrack, MediaKind, ParticipantId, SurfaceId,
};

/// Lifecycle of a call session
///
/// Transitions only move forward. `Left` and `Failed` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Idle,
    Joining,
    Joined,
    Leaving,
    Left,
    Failed,
}

impl ConnectionState {
    fn rank(self) -> u8 {
        match self {
            ConnectionState::Idle => 0,
            ConnectionState::Joining => 1,
            ConnectionState::Joined => 2,
            ConnectionState::Leaving => 3,
            ConnectionState::Left | ConnectionState::Failed => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Left | ConnectionState::Failed)
    }

    /// Leaving or already ended
    pub fn is_closing(self) -> bool {
        self == ConnectionState::Leaving || self.is_terminal()
    }

    pub fn can_advance_to(self, next: ConnectionState) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Joining => "joining",
            ConnectionState::Joined => "joined",
            ConnectionState::Leaving => "leaving",
            ConnectionState::Left => "left",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Local capture track slot
#[derive(Default)]
pub enum TrackSlot {
    #[default]
    Absent,
    Present {
        track: Box<dyn LocalTrack>,
        enabled: bool,
    },
}

impl TrackSlot {
    pub fn present(track: Box<dyn LocalTrack>) -> Self {
        TrackSlot::Present {
            track,
            enabled: true,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, TrackSlot::Present { .. })
    }

    /// An absent track counts as muted
    pub fn is_muted(&self) -> bool {
        match self {
            TrackSlot::Absent => true,
            TrackSlot::Present { enabled, .. } => !enabled,
        }
    }

    pub fn track(&self) -> Option<&dyn LocalTrack> {
        match self {
            TrackSlot::Absent => None,
            TrackSlot::Present { track, .. } => Some(track.as_ref()),
        }
    }

    /// Empty the slot, handing back the track for release
    pub fn take(&mut self) -> Option<Box<dyn LocalTrack>> {
        match std::mem::replace(self, TrackSlot::Absent) {
            TrackSlot::Absent => None,
            TrackSlot::Present { track, .. } => Some(track),
        }
    }
}

impl fmt::Debug for TrackSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackSlot::Absent => f.write_str("Absent"),
            TrackSlot::Present { track, enabled } => f
                .debug_struct("Present")
                .field("kind", &track.kind())
                .field("enabled", enabled)
                .finish(),
        }
    }
}

/// Whether the client holds a channel membership that must be released
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Membership {
    #[default]
    None,
    /// Join issued, outcome unknown
    Pending,
    Joined,
}

/// A remote peer with at least one available media kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteParticipant {
    pub id: ParticipantId,
    pub audio_available: bool,
    pub video_available: bool,
    pub bound_surface: Option<SurfaceId>,
    pub first_seen: DateTime<Utc>,
}

impl RemoteParticipant {
    pub fn new(id: ParticipantId) -> Self {
        Self {
            id,
            audio_available: false,
            video_available: false,
            bound_surface: None,
            first_seen: Utc::now(),
        }
    }

    pub fn is_available(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.audio_available,
            MediaKind::Video => self.video_available,
        }
    }

    /// Clearing video also clears the bound surface.
    pub fn set_available(&mut self, kind: MediaKind, available: bool) {
        match kind {
            MediaKind::Audio => self.audio_available = available,
            MediaKind::Video => {
                self.video_available = available;
                if !available {
                    self.bound_surface = None;
                }
            }
        }
    }

    pub fn has_media(&self) -> bool {
        self.audio_available || self.video_available
    }
}

/// Session counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub events_processed: u64,
    pub events_dropped: u64,
    pub subscribe_failures: u64,
    pub control_failures: u64,
}

/// Serializable view of a remote participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantView {
    pub id: ParticipantId,
    pub audio: bool,
    pub video: bool,
    pub surface: Option<SurfaceId>,
    pub first_seen: DateTime<Utc>,
}

impl From<&RemoteParticipant> for ParticipantView {
    fn from(p: &RemoteParticipant) -> Self {
        Self {
            id: p.id.clone(),
            audio: p.audio_available,
            video: p.video_available,
            surface: p.bound_surface.clone(),
            first_seen: p.first_seen,
        }
    }
}

/// Point-in-time copy of a session, safe to hand across tasks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub channel: Option<ChannelId>,
    pub local_identity: Option<LocalIdentity>,
    pub state: ConnectionState,
    pub audio_muted: bool,
    pub video_muted: bool,
    pub has_audio_track: bool,
    pub has_video_track: bool,
    pub participants: Vec<ParticipantView>,
    pub stats: SessionStats,
}

/// One call, from join to leave
pub struct CallSession {
    id: Uuid,
    channel: Option<ChannelId>,
    local_identity: Option<LocalIdentity>,
    state: ConnectionState,
    pub(crate) audio: TrackSlot,
    pub(crate) video: TrackSlot,
    pub(crate) participants: IndexMap<ParticipantId, RemoteParticipant>,
    pub(crate) client: Option<Box<dyn EngineClient>>,
    pub(crate) membership: Membership,
    pub(crate) stats: SessionStats,
}

impl CallSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: None,
            local_identity: None,
            state: ConnectionState::Idle,
            audio: TrackSlot::Absent,
            video: TrackSlot::Absent,
            participants: IndexMap::new(),
            client: None,
            membership: Membership::None,
            stats: SessionStats::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn channel(&self) -> Option<&ChannelId> {
        self.channel.as_ref()
    }

    pub fn local_identity(&self) -> Option<LocalIdentity> {
        self.local_identity
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Move to `next` if the transition is forward. Returns whether it happened.
    pub fn advance(&mut self, next: ConnectionState) -> bool {
        if !self.state.can_advance_to(next) {
            tracing::warn!(
                session = %self.id,
                from = %self.state,
                to = %next,
                "Ignoring backward state transition"
            );
            return false;
        }
        tracing::debug!(session = %self.id, from = %self.state, to = %next, "State transition");
        self.state = next;
        true
    }

    /// Set once, when the join starts
    pub(crate) fn bind_channel(&mut self, channel: ChannelId) {
        if self.channel.is_none() {
            self.channel = Some(channel);
        }
    }

    pub(crate) fn set_local_identity(&mut self, identity: LocalIdentity) {
        self.local_identity = Some(identity);
    }

    /// Anything teardown would have to release
    pub(crate) fn holds_resources(&self) -> bool {
        self.membership != Membership::None
            || self.audio.is_present()
            || self.video.is_present()
            || !self.participants.is_empty()
    }

    pub fn slot(&self, kind: MediaKind) -> &TrackSlot {
        match kind {
            MediaKind::Audio => &self.audio,
            MediaKind::Video => &self.video,
        }
    }

    pub fn is_muted(&self, kind: MediaKind) -> bool {
        self.slot(kind).is_muted()
    }

    pub fn participant(&self, id: &ParticipantId) -> Option<&RemoteParticipant> {
        self.participants.get(id)
    }

    /// Participants in first-seen order
    pub fn participants(&self) -> impl Iterator<Item = &RemoteParticipant> {
        self.participants.values()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id,
            channel: self.channel.clone(),
            local_identity: self.local_identity,
            state: self.state,
            audio_muted: self.audio.is_muted(),
            video_muted: self.video.is_muted(),
            has_audio_track: self.audio.is_present(),
            has_video_track: self.video.is_present(),
            participants: self.participants.values().map(ParticipantView::from).collect(),
            stats: self.stats.clone(),
        }
    }
}

impl Default for CallSession {
    fn default() -> Self {
        Self::new()
    }
}
