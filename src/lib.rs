//! # Callroom
//!
//! Call-session lifecycle on top of a real-time media engine: join a
//! channel, publish microphone and camera, follow remote participants,
//! toggle local media and leave without leaking anything.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │  Call entry (entry)                                                      │
//! │    CallRequest ──▶ TokenService ──▶ CallTicket { channel, token, role }  │
//! └──────────────────────────────────┬───────────────────────────────────────┘
//!                                    │ spawn_session
//!                                    ▼
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │  Session actor (session::actor)              one task per call           │
//! │  ┌──────────────┐   commands    ┌──────────────────────────────────────┐ │
//! │  │SessionHandle │──────────────▶│ SessionController                     │ │
//! │  │ (view, HTTP) │◀──────────────│   CallSession (state, tracks,         │ │
//! │  └──────────────┘ snapshots,    │                participants)          │ │
//! │                   notices       │   ParticipantViewBinder ──▶ surfaces  │ │
//! │                                 └───────────────┬──────────────────────┘ │
//! └─────────────────────────────────────────────────┼────────────────────────┘
//!                          join / publish / subscribe│  ▲ participant events
//!                                                    ▼  │ (ordered mpsc)
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │  Media engine adapter (engine)                                           │
//! │    MediaEngine ─▶ EngineClient, LocalTrack        SimulatedEngine        │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod engine;
pub mod entry;
pub mod error;
pub mod session;
#[cfg(feature = "control-api")]
pub mod ui;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Upper bound (exclusive) for randomly chosen local identities
    pub const DEFAULT_IDENTITY_RANGE: u32 = 1_000_000;

    /// Commands that may wait in front of a session actor
    pub const DEFAULT_COMMAND_QUEUE: usize = 32;

    /// Session notices buffered per subscriber
    pub const NOTICE_CAPACITY: usize = 64;

    /// Surface the local camera preview renders into
    pub const LOCAL_PREVIEW_SURFACE: &str = "local-preview";

    /// Remote video surfaces are `<prefix><participant id>`
    pub const REMOTE_SURFACE_PREFIX: &str = "remote-";

    /// Default bind address for the control API
    pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";

    /// Default HTTP port for the control API
    pub const DEFAULT_HTTP_PORT: u16 = 8080;
}
