//! Command facade
//!
//! `Jukebox` is the single entry point for callers. It ties the queue,
//! the player and the volume together and returns plain values for the
//! caller to render.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;

use crate::player::{ NowPlaying, PlaybackController, PlayerCommand, PlayerEvent };
use crate::queue::{ QueueError, QueueItem, QueueStore };
use crate::scheduler::Scheduler;
use crate::volume::{ VolumeController, VolumeError, VolumeOutcome };


/// Hard failures surfaced to callers.
#[derive( Debug, Error )]
pub enum JukeboxError {
    #[error( transparent )]
    Queue( #[from] QueueError ),

    #[error( transparent )]
    Volume( #[from] VolumeError ),
}


/// Combined view of the player, queue and volume.
#[derive( Debug, Clone )]
pub struct Status {
    pub now_playing: Option<NowPlaying>,
    pub queue: Vec<QueueItem>,
    pub volume: u8,
}


/// Result of `stop`.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub struct StopOutcome {
    /// Whether something was playing and got terminated.
    pub terminated: bool,
    /// Number of queued items discarded.
    pub cleared: usize,
}


pub struct Jukebox {
    queue: Arc<QueueStore>,
    player: Arc<PlaybackController>,
    volume: Arc<VolumeController>,
}


impl Jukebox {
    pub fn new( queue: QueueStore, player: PlaybackController, volume: VolumeController ) -> Self {
        Self {
            queue: Arc::new( queue ),
            player: Arc::new( player ),
            volume: Arc::new( volume ),
        }
    }


    /// Opens the queue at `queue_file` and builds a jukebox around it.
    pub async fn open(
        queue_file: impl Into<std::path::PathBuf>,
        player: PlayerCommand,
        volume: VolumeController,
    ) -> Result<Self, JukeboxError> {
        let queue = QueueStore::open( queue_file ).await?;
        Ok( Self::new( queue, PlaybackController::new( player ), volume ) )
    }


    /// Creates the scheduler that drains this jukebox's queue.
    pub fn scheduler( &self, period: Duration ) -> Scheduler {
        Scheduler::new( Arc::clone( &self.queue ), Arc::clone( &self.player ), period )
    }


    /// Subscribes to playback events.
    pub fn subscribe( &self ) -> broadcast::Receiver<PlayerEvent> {
        self.player.subscribe()
    }


    /// Adds an acquired item to the queue.
    ///
    /// @returns The item's 1-based queue position
    pub async fn enqueue( &self, item: QueueItem ) -> Result<usize, JukeboxError> {
        let title = item.title().to_string();
        let position = self.queue.append( item ).await?;
        tracing::info!( "Queued #{}: {}", position, title );
        Ok( position )
    }


    /// Skips the active song. Returns false if nothing was playing.
    pub fn skip( &self ) -> bool {
        self.player.terminate()
    }


    /// Stops playback and empties the queue.
    pub async fn stop( &self ) -> Result<StopOutcome, JukeboxError> {
        let terminated = self.player.terminate();
        let cleared = self.clear().await?;
        Ok( StopOutcome { terminated, cleared } )
    }


    /// Empties the queue without touching the active song.
    ///
    /// @returns The number of items removed
    pub async fn clear( &self ) -> Result<usize, JukeboxError> {
        let removed = self.queue.clear().await?;
        for item in &removed {
            discard_file( item );
        }
        if !removed.is_empty() {
            tracing::info!( "Cleared {} queued item(s)", removed.len() );
        }
        Ok( removed.len() )
    }


    pub async fn set_volume( &self, level: i32 ) -> Result<VolumeOutcome, JukeboxError> {
        Ok( self.volume.set( level ).await? )
    }


    pub async fn volume_up( &self ) -> VolumeOutcome {
        self.volume.adjust( i32::from( self.volume.step() ) ).await
    }


    pub async fn volume_down( &self ) -> VolumeOutcome {
        self.volume.adjust( -i32::from( self.volume.step() ) ).await
    }


    pub fn volume( &self ) -> u8 {
        self.volume.get()
    }


    pub fn now_playing( &self ) -> Option<NowPlaying> {
        self.player.currently_playing()
    }


    pub async fn status( &self ) -> Status {
        Status {
            now_playing: self.player.currently_playing(),
            queue: self.queue.snapshot().await,
            volume: self.volume.get(),
        }
    }
}


/// Removes the backing file of an item that will never be played.
fn discard_file( item: &QueueItem ) {
    let path = item.local_file_path();
    match std::fs::remove_file( path ) {
        Ok(()) => tracing::debug!( "Deleted: {}", path.display() ),
        Err( e ) => tracing::warn!( "Failed to delete {}: {}", path.display(), e ),
    }
}


#[cfg( all( test, unix ) )]
mod tests {
    use super::*;

    use std::path::PathBuf;

    use tempfile::TempDir;
    use tokio::sync::watch;

    use crate::volume::DEFAULT_VOLUME_STEP;


    struct Fixture {
        dir: TempDir,
        jukebox: Jukebox,
    }


    impl Fixture {
        async fn new( script: &str, volume: u8 ) -> Self {
            let dir = TempDir::new().unwrap();
            let player = PlayerCommand {
                program: "sh".to_string(),
                args: vec![ "-c".to_string(), script.to_string(), "player".to_string() ],
            };
            let volume = VolumeController::new( volume, DEFAULT_VOLUME_STEP, Vec::new() );
            let jukebox = Jukebox::open( dir.path().join( "queue.json" ), player, volume ).await.unwrap();
            Self { dir, jukebox }
        }


        fn item( &self, title: &str ) -> QueueItem {
            let path = self.file( title );
            std::fs::write( &path, b"ID3" ).unwrap();
            QueueItem::new( format!( "https://example.com/{}", title ), title, "tester", path )
        }


        fn file( &self, title: &str ) -> PathBuf {
            self.dir.path().join( format!( "{}.mp3", title ) )
        }
    }


    async fn wait_until<F>( mut condition: F )
    where
        F: FnMut() -> bool,
    {
        for _ in 0..300 {
            if condition() {
                return;
            }
            tokio::time::sleep( Duration::from_millis( 10 ) ).await;
        }
        panic!( "condition not met in time" );
    }


    fn playing_title( jukebox: &Jukebox ) -> Option<String> {
        jukebox.now_playing().map( |n| n.item.title().to_string() )
    }


    #[tokio::test]
    async fn test_enqueue_then_play_in_order() {
        let fx = Fixture::new( "sleep 30", 50 ).await;

        assert_eq!( fx.jukebox.enqueue( fx.item( "A" ) ).await.unwrap(), 1 );
        assert_eq!( fx.jukebox.enqueue( fx.item( "B" ) ).await.unwrap(), 2 );

        let status = fx.jukebox.status().await;
        assert_eq!( status.queue.len(), 2 );
        assert!( status.now_playing.is_none() );

        let ( shutdown_tx, shutdown_rx ) = watch::channel( false );
        let task = tokio::spawn( fx.jukebox.scheduler( Duration::from_millis( 20 ) ).run( shutdown_rx ) );

        wait_until( || playing_title( &fx.jukebox ).as_deref() == Some( "A" ) ).await;
        let status = fx.jukebox.status().await;
        assert_eq!( status.queue.len(), 1 );
        assert_eq!( status.queue[ 0 ].title(), "B" );

        // Finish A early; B takes over
        assert!( fx.jukebox.skip() );
        wait_until( || playing_title( &fx.jukebox ).as_deref() == Some( "B" ) ).await;
        assert!( fx.jukebox.status().await.queue.is_empty() );
        assert!( !fx.file( "A" ).exists() );

        shutdown_tx.send( true ).unwrap();
        task.await.unwrap();
    }


    #[tokio::test]
    async fn test_skip_before_dequeue() {
        let fx = Fixture::new( "sleep 30", 50 ).await;
        fx.jukebox.enqueue( fx.item( "A" ) ).await.unwrap();

        assert!( !fx.jukebox.skip() );
        let status = fx.jukebox.status().await;
        assert_eq!( status.queue.len(), 1 );
        assert!( fx.file( "A" ).exists() );
    }


    #[tokio::test]
    async fn test_clear_keeps_active_song() {
        let fx = Fixture::new( "sleep 30", 50 ).await;
        fx.jukebox.enqueue( fx.item( "A" ) ).await.unwrap();
        fx.jukebox.enqueue( fx.item( "B" ) ).await.unwrap();
        fx.jukebox.enqueue( fx.item( "C" ) ).await.unwrap();

        let ( shutdown_tx, shutdown_rx ) = watch::channel( false );
        let task = tokio::spawn( fx.jukebox.scheduler( Duration::from_millis( 20 ) ).run( shutdown_rx ) );
        wait_until( || playing_title( &fx.jukebox ).is_some() ).await;

        assert_eq!( fx.jukebox.clear().await.unwrap(), 2 );
        let status = fx.jukebox.status().await;
        assert!( status.queue.is_empty() );
        assert_eq!( status.now_playing.unwrap().item.title(), "A" );
        assert!( !fx.file( "B" ).exists() );
        assert!( !fx.file( "C" ).exists() );

        shutdown_tx.send( true ).unwrap();
        task.await.unwrap();
    }


    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let fx = Fixture::new( "sleep 30", 50 ).await;
        fx.jukebox.enqueue( fx.item( "A" ) ).await.unwrap();
        fx.jukebox.enqueue( fx.item( "B" ) ).await.unwrap();

        let ( shutdown_tx, shutdown_rx ) = watch::channel( false );
        let task = tokio::spawn( fx.jukebox.scheduler( Duration::from_millis( 20 ) ).run( shutdown_rx ) );
        wait_until( || playing_title( &fx.jukebox ).is_some() ).await;

        let first = fx.jukebox.stop().await.unwrap();
        assert_eq!( first, StopOutcome { terminated: true, cleared: 1 } );

        wait_until( || fx.jukebox.now_playing().is_none() ).await;
        let second = fx.jukebox.stop().await.unwrap();
        assert_eq!( second, StopOutcome { terminated: false, cleared: 0 } );

        let status = fx.jukebox.status().await;
        assert!( status.queue.is_empty() );
        assert!( status.now_playing.is_none() );

        shutdown_tx.send( true ).unwrap();
        task.await.unwrap();
    }


    #[tokio::test]
    async fn test_volume_commands() {
        let fx = Fixture::new( "exit 0", 50 ).await;

        let result = fx.jukebox.set_volume( 150 ).await;
        assert!( matches!( result, Err( JukeboxError::Volume( VolumeError::InvalidVolume( 150 ) ) ) ) );
        assert_eq!( fx.jukebox.volume(), 50 );

        fx.jukebox.set_volume( 95 ).await.unwrap();
        assert_eq!( fx.jukebox.volume_up().await.level(), 100 );
        assert_eq!( fx.jukebox.volume(), 100 );

        assert_eq!( fx.jukebox.volume_down().await.level(), 90 );
        assert_eq!( fx.jukebox.status().await.volume, 90 );
    }
}
