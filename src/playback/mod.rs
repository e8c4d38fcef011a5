pub mod clock;
pub mod engine;
pub mod read_thread;
pub mod refresh;
pub mod state;
pub mod sync;
pub mod workers;

pub use clock::Clock;
pub use engine::{Player, PlayerCommand, PlayerError, PlayerEvent, QuitReason};
pub use read_thread::{Pump, ReadLoop};
pub use refresh::VideoRefresh;
pub use state::{PlayerState, PlayerStats, SourceInfo};
pub use sync::SyncSource;
