//! Playback process control
//!
//! The PlaybackController owns the "now playing" slot. It launches an
//! external player for one item at a time, waits for it to exit, and can
//! kill it on request. All cleanup for a finished item (reaping the
//! process, deleting the backing file, emitting `Finished`) happens in
//! the future that launched it, so it runs exactly once.

use std::io::ErrorKind;
use std::path::{ Path, PathBuf };
use std::process::{ ExitStatus, Stdio };

use chrono::{ DateTime, Utc };
use parking_lot::Mutex;
use thiserror::Error;
use tokio::process::{ Child, Command };
use tokio::sync::{ broadcast, oneshot };

use crate::queue::QueueItem;


const EVENT_CAPACITY: usize = 32;


/// Errors that can occur while driving the player process.
#[derive( Debug, Error )]
pub enum PlayerError {
    #[error( "Failed to launch player '{program}': {source}" )]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error( "Failed to wait for player process: {0}" )]
    Wait( #[source] std::io::Error ),
}


/// Lifecycle phase of the playback slot.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub enum PlaybackPhase {
    #[default]
    Idle,
    Starting,
    Running,
    Terminating,
}


/// How a playback ended.
#[derive( Debug, Clone, PartialEq, Eq )]
pub enum PlaybackOutcome {
    /// The player exited with status 0.
    Completed,
    /// The player exited with a non-zero status (or none, if killed by a signal).
    Failed { code: Option<i32> },
    /// Playback was cut short by `terminate`.
    Terminated,
    /// The player binary could not be started.
    LaunchFailed { message: String },
}


/// The "finished" signal for one item.
#[derive( Debug, Clone )]
pub struct PlaybackFinished {
    pub item: QueueItem,
    pub outcome: PlaybackOutcome,
}


/// Events emitted by the controller for callers to render.
#[derive( Debug, Clone )]
pub enum PlayerEvent {
    Started { item: QueueItem },
    Finished( PlaybackFinished ),
}


/// Snapshot of the active session.
#[derive( Debug, Clone )]
pub struct NowPlaying {
    pub item: QueueItem,
    pub started_at: DateTime<Utc>,
    pub phase: PlaybackPhase,
}


/// External player invocation. The file path is appended as the last argument.
#[derive( Debug, Clone )]
pub struct PlayerCommand {
    pub program: String,
    pub args: Vec<String>,
}


impl Default for PlayerCommand {
    fn default() -> Self {
        Self {
            program: "mpg123".to_string(),
            args: Vec::new(),
        }
    }
}


struct Session {
    item: QueueItem,
    started_at: DateTime<Utc>,
}


#[derive( Default )]
struct Slot {
    phase: PlaybackPhase,
    session: Option<Session>,
    /// Kill request channel, installed with the session. Taken by the first `terminate`.
    kill: Option<oneshot::Sender<()>>,
}


/// Owns the single playback slot.
pub struct PlaybackController {
    command: PlayerCommand,
    slot: Mutex<Slot>,
    events: broadcast::Sender<PlayerEvent>,
}


impl PlaybackController {
    /// Creates an idle controller that plays files with `command`.
    pub fn new( command: PlayerCommand ) -> Self {
        let ( events, _ ) = broadcast::channel( EVENT_CAPACITY );
        Self {
            command,
            slot: Mutex::new( Slot::default() ),
            events,
        }
    }


    /// Claims the slot for a new playback.
    ///
    /// The check for `Idle` and the move to `Starting` happen under one
    /// lock, so at most one reservation exists at a time.
    pub fn reserve( &self ) -> Option<Reservation<'_>> {
        let mut slot = self.slot.lock();
        if slot.phase != PlaybackPhase::Idle {
            return None;
        }

        slot.phase = PlaybackPhase::Starting;
        Some( Reservation { controller: self, released: false } )
    }


    /// Requests that the active playback stop.
    ///
    /// Sends the kill request and returns immediately. Returns false if
    /// no item has been handed to the player yet or a stop is already
    /// under way.
    pub fn terminate( &self ) -> bool {
        let mut slot = self.slot.lock();
        if !matches!( slot.phase, PlaybackPhase::Starting | PlaybackPhase::Running ) {
            return false;
        }

        // A reservation still waiting on the queue has nothing to stop
        let Some( kill ) = slot.kill.take() else {
            return false;
        };

        slot.phase = PlaybackPhase::Terminating;
        let _ = kill.send( () );
        tracing::info!( "Terminating playback" );
        true
    }


    /// Gets the active item, if any.
    pub fn currently_playing( &self ) -> Option<NowPlaying> {
        let slot = self.slot.lock();
        slot.session.as_ref().map( |s| NowPlaying {
            item: s.item.clone(),
            started_at: s.started_at,
            phase: slot.phase,
        })
    }


    pub fn phase( &self ) -> PlaybackPhase {
        self.slot.lock().phase
    }


    pub fn is_idle( &self ) -> bool {
        self.phase() == PlaybackPhase::Idle
    }


    /// Subscribes to `Started`/`Finished` events.
    pub fn subscribe( &self ) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }


    fn launch( &self, path: &Path ) -> Result<Child, PlayerError> {
        Command::new( &self.command.program )
            .args( &self.command.args )
            .arg( path )
            .stdin( Stdio::null() )
            .stdout( Stdio::null() )
            .stderr( Stdio::null() )
            .kill_on_drop( true )
            .spawn()
            .map_err( |source| PlayerError::Launch {
                program: self.command.program.clone(),
                source,
            })
    }


    /// Installs the session for `item` along with its kill channel.
    fn install_session( &self, item: &QueueItem, kill: oneshot::Sender<()> ) {
        let mut slot = self.slot.lock();
        slot.session = Some( Session { item: item.clone(), started_at: Utc::now() } );
        slot.kill = Some( kill );
    }


    /// Moves `Starting` to `Running` once the process is up.
    ///
    /// Returns false if a terminate already landed, in which case the
    /// start is not announced.
    fn begin_running( &self ) -> bool {
        let mut slot = self.slot.lock();
        if slot.phase != PlaybackPhase::Starting {
            return false;
        }
        slot.phase = PlaybackPhase::Running;
        true
    }


    fn emit( &self, event: PlayerEvent ) {
        // No subscribers is fine
        let _ = self.events.send( event );
    }
}


/// A claimed playback slot.
///
/// Dropping a reservation without playing returns the controller to `Idle`.
pub struct Reservation<'a> {
    controller: &'a PlaybackController,
    released: bool,
}


impl Reservation<'_> {
    /// Plays `item` to the end, or until terminated.
    ///
    /// The item's backing file is deleted on every path out of this
    /// function, including launch failure and the future being dropped.
    pub async fn play( mut self, item: QueueItem ) -> PlaybackFinished {
        let mut backing = BackingFile::new( item.local_file_path() );
        let ( kill_tx, kill_rx ) = oneshot::channel();

        self.controller.install_session( &item, kill_tx );

        let outcome = match self.controller.launch( item.local_file_path() ) {
            Ok( child ) => {
                if self.controller.begin_running() {
                    tracing::info!( "Now playing: {}", item.title() );
                    tracing::info!( "File path: {}", item.local_file_path().display() );
                    self.controller.emit( PlayerEvent::Started { item: item.clone() } );
                }

                supervise( child, kill_rx ).await
            }
            Err( e ) => {
                tracing::error!( "{}", e );
                PlaybackOutcome::LaunchFailed { message: e.to_string() }
            }
        };

        match &outcome {
            PlaybackOutcome::Completed => tracing::info!( "Finished playing: {}", item.title() ),
            PlaybackOutcome::Failed { code } => {
                tracing::warn!( "Player exited abnormally ({:?}) for: {}", code, item.title() )
            }
            PlaybackOutcome::Terminated => tracing::info!( "Stopped: {}", item.title() ),
            PlaybackOutcome::LaunchFailed { .. } => {
                tracing::warn!( "Abandoning: {}", item.title() )
            }
        }

        backing.remove();
        self.release();

        let finished = PlaybackFinished { item, outcome };
        self.controller.emit( PlayerEvent::Finished( finished.clone() ) );
        finished
    }


    fn release( &mut self ) {
        if !self.released {
            self.released = true;
            *self.controller.slot.lock() = Slot::default();
        }
    }
}


impl Drop for Reservation<'_> {
    fn drop( &mut self ) {
        self.release();
    }
}


/// Waits for the child to exit, killing it if a kill request arrives first.
async fn supervise( mut child: Child, kill_rx: oneshot::Receiver<()> ) -> PlaybackOutcome {
    let kill_requested = tokio::select! {
        status = child.wait() => return exit_outcome( status ),
        request = kill_rx => request.is_ok(),
    };

    if !kill_requested {
        return exit_outcome( child.wait().await );
    }

    // The process may already be gone if it exited on its own at the same moment
    if let Err( e ) = child.start_kill() {
        tracing::debug!( "Kill signal not delivered: {}", e );
    }
    if let Err( e ) = child.wait().await {
        tracing::warn!( "{}", PlayerError::Wait( e ) );
    }

    PlaybackOutcome::Terminated
}


fn exit_outcome( status: std::io::Result<ExitStatus> ) -> PlaybackOutcome {
    match status {
        Ok( status ) if status.success() => PlaybackOutcome::Completed,
        Ok( status ) => PlaybackOutcome::Failed { code: status.code() },
        Err( e ) => {
            tracing::error!( "{}", PlayerError::Wait( e ) );
            PlaybackOutcome::Failed { code: None }
        }
    }
}


/// The file behind a dequeued item. Removed at most once.
struct BackingFile {
    path: PathBuf,
    removed: bool,
}


impl BackingFile {
    fn new( path: &Path ) -> Self {
        Self { path: path.to_path_buf(), removed: false }
    }


    fn remove( &mut self ) {
        if self.removed {
            return;
        }
        self.removed = true;

        match std::fs::remove_file( &self.path ) {
            Ok(()) => tracing::info!( "Deleted: {}", self.path.display() ),
            Err( e ) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!( "Backing file already gone: {}", self.path.display() )
            }
            Err( e ) => tracing::warn!( "Failed to delete {}: {}", self.path.display(), e ),
        }
    }
}


impl Drop for BackingFile {
    fn drop( &mut self ) {
        self.remove();
    }
}


#[cfg( all( test, unix ) )]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::time::Duration;

    use tempfile::TempDir;
    use tokio::sync::broadcast::error::TryRecvError;


    /// A player that runs `script` under `sh`, with the file path as `$1`.
    fn sh_player( script: &str ) -> PlayerCommand {
        PlayerCommand {
            program: "sh".to_string(),
            args: vec![ "-c".to_string(), script.to_string(), "player".to_string() ],
        }
    }


    fn queued_file( dir: &TempDir, title: &str ) -> QueueItem {
        let path = dir.path().join( format!( "{}.mp3", title ) );
        std::fs::write( &path, b"ID3" ).unwrap();
        QueueItem::new( format!( "https://example.com/{}", title ), title, "tester", path )
    }


    async fn wait_for_phase( player: &PlaybackController, phase: PlaybackPhase ) {
        for _ in 0..200 {
            if player.phase() == phase {
                return;
            }
            tokio::time::sleep( Duration::from_millis( 10 ) ).await;
        }
        panic!( "player never reached {:?}", phase );
    }


    #[tokio::test]
    async fn test_natural_completion() {
        let dir = TempDir::new().unwrap();
        let item = queued_file( &dir, "a" );
        let path = item.local_file_path().to_path_buf();

        let player = PlaybackController::new( sh_player( "test -f \"$1\"" ) );
        let mut events = player.subscribe();

        let finished = player.reserve().unwrap().play( item ).await;
        assert_eq!( finished.outcome, PlaybackOutcome::Completed );
        assert!( !path.exists() );
        assert!( player.is_idle() );
        assert!( player.currently_playing().is_none() );

        assert!( matches!( events.try_recv(), Ok( PlayerEvent::Started { .. } ) ) );
        assert!( matches!( events.try_recv(), Ok( PlayerEvent::Finished( _ ) ) ) );
        assert!( matches!( events.try_recv(), Err( TryRecvError::Empty ) ) );
    }


    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let dir = TempDir::new().unwrap();
        let item = queued_file( &dir, "a" );
        let path = item.local_file_path().to_path_buf();

        let player = PlaybackController::new( sh_player( "exit 3" ) );
        let finished = player.reserve().unwrap().play( item ).await;

        assert_eq!( finished.outcome, PlaybackOutcome::Failed { code: Some( 3 ) } );
        assert!( !path.exists() );
        assert!( player.is_idle() );
    }


    #[tokio::test]
    async fn test_missing_player_binary() {
        let dir = TempDir::new().unwrap();
        let item = queued_file( &dir, "a" );
        let path = item.local_file_path().to_path_buf();

        let player = PlaybackController::new( PlayerCommand {
            program: "/nonexistent/sotd-player".to_string(),
            args: Vec::new(),
        });
        let mut events = player.subscribe();

        let finished = player.reserve().unwrap().play( item ).await;
        assert!( matches!( finished.outcome, PlaybackOutcome::LaunchFailed { .. } ) );
        assert!( !path.exists() );
        assert!( player.is_idle() );

        // No Started event for an item that never launched
        assert!( matches!( events.try_recv(), Ok( PlayerEvent::Finished( _ ) ) ) );
        assert!( matches!( events.try_recv(), Err( TryRecvError::Empty ) ) );
    }


    #[tokio::test]
    async fn test_single_reservation() {
        let player = PlaybackController::new( PlayerCommand::default() );

        let first = player.reserve().unwrap();
        assert_eq!( player.phase(), PlaybackPhase::Starting );
        assert!( player.reserve().is_none() );

        drop( first );
        assert!( player.is_idle() );
        assert!( player.reserve().is_some() );
    }


    #[tokio::test]
    async fn test_terminate_when_idle() {
        let player = PlaybackController::new( PlayerCommand::default() );
        assert!( !player.terminate() );
        assert!( player.is_idle() );
    }


    #[tokio::test]
    async fn test_terminate_twice_finishes_once() {
        let dir = TempDir::new().unwrap();
        let item = queued_file( &dir, "a" );
        let path = item.local_file_path().to_path_buf();

        let player = Arc::new( PlaybackController::new( sh_player( "sleep 30" ) ) );
        let mut events = player.subscribe();

        let task = {
            let player = Arc::clone( &player );
            tokio::spawn( async move {
                let reservation = player.reserve().unwrap();
                reservation.play( item ).await
            })
        };

        wait_for_phase( &player, PlaybackPhase::Running ).await;
        let now = player.currently_playing().unwrap();
        assert_eq!( now.item.title(), "a" );
        assert!( path.exists() );

        assert!( player.terminate() );
        assert!( !player.terminate() );

        let finished = tokio::time::timeout( Duration::from_secs( 5 ), task ).await
            .unwrap()
            .unwrap();
        assert_eq!( finished.outcome, PlaybackOutcome::Terminated );
        assert!( !path.exists() );
        assert!( player.is_idle() );
        assert!( !player.terminate() );

        assert!( matches!( events.try_recv(), Ok( PlayerEvent::Started { .. } ) ) );
        assert!( matches!( events.try_recv(), Ok( PlayerEvent::Finished( _ ) ) ) );
        assert!( matches!( events.try_recv(), Err( TryRecvError::Empty ) ) );
    }


    #[tokio::test]
    async fn test_terminate_racing_natural_exit() {
        let dir = TempDir::new().unwrap();
        let player = Arc::new( PlaybackController::new( sh_player( "exit 0" ) ) );
        let mut events = player.subscribe();

        for i in 0..10 {
            let item = queued_file( &dir, &format!( "song{}", i ) );
            let task = {
                let player = Arc::clone( &player );
                tokio::spawn( async move {
                    player.reserve().unwrap().play( item ).await
                })
            };

            tokio::task::yield_now().await;
            player.terminate();

            let finished = task.await.unwrap();
            assert!( matches!(
                finished.outcome,
                PlaybackOutcome::Completed | PlaybackOutcome::Terminated
            ));
            assert!( player.is_idle() );
        }

        let mut finished_events = 0;
        loop {
            match events.try_recv() {
                Ok( PlayerEvent::Finished( _ ) ) => finished_events += 1,
                Ok( PlayerEvent::Started { .. } ) => {}
                Err( _ ) => break,
            }
        }
        assert_eq!( finished_events, 10 );
        assert_eq!( std::fs::read_dir( dir.path() ).unwrap().count(), 0 );
    }


    #[tokio::test]
    async fn test_terminate_between_reserve_and_play_is_noop() {
        let dir = TempDir::new().unwrap();
        let item = queued_file( &dir, "a" );
        let path = item.local_file_path().to_path_buf();

        let player = PlaybackController::new( sh_player( "exit 0" ) );
        let mut events = player.subscribe();

        // Slot claimed but no item handed over yet
        let reservation = player.reserve().unwrap();
        assert!( !player.terminate() );
        assert_eq!( player.phase(), PlaybackPhase::Starting );
        assert!( player.currently_playing().is_none() );

        let finished = reservation.play( item ).await;
        assert_eq!( finished.outcome, PlaybackOutcome::Completed );
        assert!( matches!( events.try_recv(), Ok( PlayerEvent::Started { .. } ) ) );
        assert!( !path.exists() );
        assert!( player.is_idle() );
    }


    #[test]
    fn test_terminate_before_running_skips_announcement() {
        let dir = TempDir::new().unwrap();
        let item = queued_file( &dir, "a" );

        let player = PlaybackController::new( sh_player( "exit 0" ) );
        let reservation = player.reserve().unwrap();
        let ( kill_tx, mut kill_rx ) = oneshot::channel();
        player.install_session( &item, kill_tx );

        // Lands after the session exists but before the process is marked running
        assert!( player.terminate() );
        assert!( kill_rx.try_recv().is_ok() );
        assert!( !player.begin_running() );
        assert_eq!( player.phase(), PlaybackPhase::Terminating );

        drop( reservation );
        assert!( player.is_idle() );
    }


    #[tokio::test]
    async fn test_dropped_playback_cleans_up() {
        let dir = TempDir::new().unwrap();
        let item = queued_file( &dir, "a" );
        let path = item.local_file_path().to_path_buf();

        let player = PlaybackController::new( sh_player( "sleep 30" ) );
        let reservation = player.reserve().unwrap();

        let result = tokio::time::timeout(
            Duration::from_millis( 200 ),
            reservation.play( item ),
        ).await;
        assert!( result.is_err() );

        assert!( !path.exists() );
        assert!( player.is_idle() );
    }
}
