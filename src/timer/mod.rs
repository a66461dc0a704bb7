pub mod driver;
pub mod state;

pub use driver::{ClientTimerDriver, DriverConfig, SessionFinished};
pub use state::{DriverStatus, TimerState};
