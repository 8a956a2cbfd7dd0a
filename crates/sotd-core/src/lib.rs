//! SOTD Core - Queue and playback engine
//!
//! This crate provides the core of the jukebox: the durable song queue,
//! the player process controller, the volume model, the scheduling loop
//! that drains the queue, and the facade callers drive it through.

pub mod command;
pub mod jukebox;
pub mod player;
pub mod queue;
pub mod scheduler;
pub mod volume;

pub use command::{ Command, CommandError, VolumeChange };
pub use jukebox::{ Jukebox, JukeboxError, Status, StopOutcome };
pub use player::{ NowPlaying, PlaybackController, PlaybackOutcome, PlayerCommand, PlayerEvent };
pub use queue::{ QueueError, QueueItem, QueueStore };
pub use scheduler::Scheduler;
pub use volume::{ Amixer, MixerControl, VolumeController, VolumeError, VolumeOutcome };
