pub mod admission;
pub mod inactivity;
pub mod interceptor;
pub mod keepalive;
pub mod language;
pub mod protocol;
pub mod reconnect;
pub mod session;
pub mod timer;
pub mod upstream;

// Re-export commonly used types for convenience
pub use admission::{Admission, AdmissionController, SessionPermit};
pub use interceptor::{Classified, ControlFrame, classify};
pub use language::{DEFAULT_LANGUAGE, map_language, map_language_code};
pub use protocol::{ClientRoute, ConfigAck, ErrorNotice, Frame, UpstreamControl, close_code};
pub use reconnect::{BackoffPolicy, ReconnectDecision, ReconnectPhase, Reconnector};
pub use session::{
    ClientEvent, RelayContext, Session, SessionSettings, SessionSignal, SessionStats,
    TeardownReason,
};
pub use timer::{ActivityClock, TimerHandle};
pub use upstream::{
    UpstreamConnection, UpstreamConnector, UpstreamEvent, UpstreamSettings, UpstreamState,
};
