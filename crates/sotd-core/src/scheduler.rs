//! Queue draining loop
//!
//! Every tick, if the player is idle, the head of the queue is handed to
//! the player and the loop waits for it to finish.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{ self, MissedTickBehavior };

use crate::player::{ PlaybackController, PlaybackFinished };
use crate::queue::QueueStore;


pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs( 2 );
const MIN_POLL_INTERVAL: Duration = Duration::from_millis( 10 );


/// The only consumer of the queue.
pub struct Scheduler {
    queue: Arc<QueueStore>,
    player: Arc<PlaybackController>,
    period: Duration,
}


impl Scheduler {
    pub fn new( queue: Arc<QueueStore>, player: Arc<PlaybackController>, period: Duration ) -> Self {
        Self {
            queue,
            player,
            period: period.max( MIN_POLL_INTERVAL ),
        }
    }


    /// Runs one scheduling cycle.
    ///
    /// Returns the finished playback, or None if the player was busy or
    /// the queue was empty.
    pub async fn tick( &self ) -> Option<PlaybackFinished> {
        let reservation = self.player.reserve()?;

        match self.queue.pop_front().await {
            Ok( Some( item ) ) => Some( reservation.play( item ).await ),
            Ok( None ) => None,
            Err( e ) => {
                tracing::error!( "Failed to dequeue next song: {}", e );
                None
            }
        }
    }


    /// Runs the loop until `shutdown` flips to true or its sender is dropped.
    ///
    /// A playback in progress at shutdown is killed and its file removed.
    pub async fn run( self, mut shutdown: watch::Receiver<bool> ) {
        tracing::info!( "Scheduler started (every {:?})", self.period );

        let mut ticker = time::interval( self.period );
        ticker.set_missed_tick_behavior( MissedTickBehavior::Delay );

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = async {
                    ticker.tick().await;
                    self.tick().await
                } => {}
            }
        }

        tracing::info!( "Scheduler stopped" );
    }
}


#[cfg( all( test, unix ) )]
mod tests {
    use super::*;

    use tempfile::TempDir;

    use crate::player::{ PlaybackOutcome, PlayerCommand };
    use crate::queue::QueueItem;


    fn sh_player( script: &str ) -> PlayerCommand {
        PlayerCommand {
            program: "sh".to_string(),
            args: vec![ "-c".to_string(), script.to_string(), "player".to_string() ],
        }
    }


    async fn setup( dir: &TempDir, script: &str ) -> ( Arc<QueueStore>, Arc<PlaybackController> ) {
        let queue = QueueStore::open( dir.path().join( "queue.json" ) ).await.unwrap();
        let player = PlaybackController::new( sh_player( script ) );
        ( Arc::new( queue ), Arc::new( player ) )
    }


    async fn enqueue( queue: &QueueStore, dir: &TempDir, title: &str ) {
        let path = dir.path().join( format!( "{}.mp3", title ) );
        std::fs::write( &path, b"ID3" ).unwrap();
        queue.append( QueueItem::new( title, title, "tester", path ) ).await.unwrap();
    }


    #[tokio::test]
    async fn test_tick_on_empty_queue() {
        let dir = TempDir::new().unwrap();
        let ( queue, player ) = setup( &dir, "exit 0" ).await;
        let scheduler = Scheduler::new( queue, Arc::clone( &player ), DEFAULT_POLL_INTERVAL );

        assert!( scheduler.tick().await.is_none() );
        assert!( player.is_idle() );
    }


    #[tokio::test]
    async fn test_ticks_play_in_fifo_order() {
        let dir = TempDir::new().unwrap();
        let ( queue, player ) = setup( &dir, "exit 0" ).await;
        enqueue( &queue, &dir, "a" ).await;
        enqueue( &queue, &dir, "b" ).await;

        let scheduler = Scheduler::new( Arc::clone( &queue ), player, DEFAULT_POLL_INTERVAL );

        let first = scheduler.tick().await.unwrap();
        assert_eq!( first.item.title(), "a" );
        assert_eq!( first.outcome, PlaybackOutcome::Completed );
        assert_eq!( queue.len().await, 1 );

        let second = scheduler.tick().await.unwrap();
        assert_eq!( second.item.title(), "b" );
        assert!( queue.is_empty().await );
        assert!( !dir.path().join( "a.mp3" ).exists() );
        assert!( !dir.path().join( "b.mp3" ).exists() );
    }


    #[tokio::test]
    async fn test_tick_skips_while_busy() {
        let dir = TempDir::new().unwrap();
        let ( queue, player ) = setup( &dir, "exit 0" ).await;
        enqueue( &queue, &dir, "a" ).await;

        let scheduler = Scheduler::new( Arc::clone( &queue ), Arc::clone( &player ), DEFAULT_POLL_INTERVAL );

        let held = player.reserve().unwrap();
        assert!( scheduler.tick().await.is_none() );
        assert_eq!( queue.len().await, 1 );
        drop( held );

        assert_eq!( scheduler.tick().await.unwrap().item.title(), "a" );
    }


    #[tokio::test]
    async fn test_skip_during_dequeue_leaves_head_to_play() {
        let dir = TempDir::new().unwrap();
        let ( queue, player ) = setup( &dir, "exit 0" ).await;
        enqueue( &queue, &dir, "a" ).await;

        let scheduler = Scheduler::new( Arc::clone( &queue ), Arc::clone( &player ), DEFAULT_POLL_INTERVAL );

        // Slot claimed ahead of the pop; nothing is playing yet
        let held = player.reserve().unwrap();
        assert!( !player.terminate() );
        drop( held );

        let finished = scheduler.tick().await.unwrap();
        assert_eq!( finished.item.title(), "a" );
        assert_eq!( finished.outcome, PlaybackOutcome::Completed );
    }


    #[tokio::test]
    async fn test_launch_failure_moves_on() {
        let dir = TempDir::new().unwrap();
        let queue = Arc::new( QueueStore::open( dir.path().join( "queue.json" ) ).await.unwrap() );
        let player = Arc::new( PlaybackController::new( PlayerCommand {
            program: "/nonexistent/sotd-player".to_string(),
            args: Vec::new(),
        }));
        enqueue( &queue, &dir, "a" ).await;
        enqueue( &queue, &dir, "b" ).await;

        let scheduler = Scheduler::new( Arc::clone( &queue ), Arc::clone( &player ), DEFAULT_POLL_INTERVAL );

        let first = scheduler.tick().await.unwrap();
        assert!( matches!( first.outcome, PlaybackOutcome::LaunchFailed { .. } ) );
        assert!( player.is_idle() );

        let second = scheduler.tick().await.unwrap();
        assert_eq!( second.item.title(), "b" );
        assert!( queue.is_empty().await );
    }


    #[tokio::test]
    async fn test_run_drains_queue_and_stops() {
        let dir = TempDir::new().unwrap();
        let ( queue, player ) = setup( &dir, "exit 0" ).await;
        enqueue( &queue, &dir, "a" ).await;
        enqueue( &queue, &dir, "b" ).await;

        let ( shutdown_tx, shutdown_rx ) = watch::channel( false );
        let scheduler = Scheduler::new( Arc::clone( &queue ), player, Duration::from_millis( 20 ) );
        let task = tokio::spawn( scheduler.run( shutdown_rx ) );

        for _ in 0..200 {
            if queue.is_empty().await && !dir.path().join( "b.mp3" ).exists() {
                break;
            }
            time::sleep( Duration::from_millis( 10 ) ).await;
        }
        assert!( queue.is_empty().await );

        shutdown_tx.send( true ).unwrap();
        time::timeout( Duration::from_secs( 5 ), task ).await.unwrap().unwrap();
    }


    #[tokio::test]
    async fn test_shutdown_kills_active_playback() {
        let dir = TempDir::new().unwrap();
        let ( queue, player ) = setup( &dir, "sleep 30" ).await;
        enqueue( &queue, &dir, "a" ).await;

        let ( shutdown_tx, shutdown_rx ) = watch::channel( false );
        let scheduler = Scheduler::new( Arc::clone( &queue ), Arc::clone( &player ), Duration::from_millis( 20 ) );
        let task = tokio::spawn( scheduler.run( shutdown_rx ) );

        for _ in 0..200 {
            if player.currently_playing().is_some() {
                break;
            }
            time::sleep( Duration::from_millis( 10 ) ).await;
        }
        assert!( player.currently_playing().is_some() );

        drop( shutdown_tx );
        time::timeout( Duration::from_secs( 5 ), task ).await.unwrap().unwrap();
        assert!( player.is_idle() );
        assert!( !dir.path().join( "a.mp3" ).exists() );
    }
}
