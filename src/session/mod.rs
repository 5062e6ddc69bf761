//! Call session lifecycle

pub mod actor;
pub mod binder;
pub mod controller;
pub mod state;

pub use actor::{spawn_session, SessionCommand, SessionHandle};
pub use binder::{NamedSurfaces, ParticipantViewBinder, SurfaceHost};
pub use controller::{SessionController, SessionNotice};
pub use state::{
    CallSession, ConnectionState, Membership, ParticipantView, RemoteParticipant,
    SessionSnapshot, SessionStats, TrackSlot,
};
