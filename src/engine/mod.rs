//! Media engine adapter boundary

pub mod adapter;
pub mod simulated;
pub mod types;

pub use adapter::{EngineClient, LocalTrack, MediaEngine};
pub use simulated::{EngineCall, FailPoint, SimulatedEngine};
pub use types::{
    ChannelId, ChannelMode, ClientConfig, EngineEvent, EngineEvents, LocalIdentity, MediaKind,
    ParticipantId, SurfaceId, VideoCodec,
};
