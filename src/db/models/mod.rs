pub mod event;
pub mod record;
pub mod session;

pub use event::{EventType, SessionEvent};
pub use record::CompletedActivityRecord;
pub use session::{NewSession, Session, SessionStatus, SessionType};
