//! sotd - chat-driven song-of-the-day jukebox
//!
//! Reads chat commands from stdin, one per line, and prints the replies
//! to stdout. Logs go to stderr.

mod cli;
mod fetch;
mod render;
mod settings;

use std::sync::Arc;

use anyhow::{ Context, Result };
use clap::Parser;
use tokio::io::{ AsyncBufReadExt, BufReader };
use tokio::sync::{ broadcast, watch };
use tracing_subscriber::{ layer::SubscriberExt, util::SubscriberInitExt, EnvFilter };

use cli::Args;
use fetch::Fetcher;
use settings::Settings;

use sotd_core::{
    command::{ self, VolumeChange },
    Command, Jukebox, PlayerEvent, QueueItem, VolumeController,
};


/// Application state shared by command handlers.
struct App {
    jukebox: Arc<Jukebox>,
    fetcher: Fetcher,
    requester: String,
}


impl App {
    /// Runs one parsed command and returns the reply.
    async fn dispatch( &self, command: Command ) -> String {
        match command {
            Command::Add { reference } => self.add( reference ).await,
            Command::Queue => render::queue( &self.jukebox.status().await ),
            Command::Clear => match self.jukebox.clear().await {
                Ok( count ) => render::cleared( count ),
                Err( e ) => render::error( &e ),
            },
            Command::NowPlaying => render::now_playing( self.jukebox.now_playing().as_ref() ),
            Command::Skip => render::skipped( self.jukebox.skip() ),
            Command::Stop => match self.jukebox.stop().await {
                Ok( outcome ) => render::stopped( outcome ),
                Err( e ) => render::error( &e ),
            },
            Command::Volume { change } => match change {
                None => render::volume_level( self.jukebox.volume() ),
                Some( VolumeChange::Set( level ) ) => match self.jukebox.set_volume( level ).await {
                    Ok( outcome ) => render::volume_changed( &outcome ),
                    Err( e ) => render::error( &e ),
                },
                Some( VolumeChange::Up ) => render::volume_changed( &self.jukebox.volume_up().await ),
                Some( VolumeChange::Down ) => render::volume_changed( &self.jukebox.volume_down().await ),
            },
            Command::Help => command::help_text().to_string(),
        }
    }


    /// Acquires a reference and queues the result.
    async fn add( &self, reference: String ) -> String {
        println!( "Downloading {}...", reference );

        let acquired = match self.fetcher.fetch( &reference ).await {
            Ok( acquired ) => acquired,
            Err( e ) => {
                tracing::warn!( "Failed to acquire {}: {:#}", reference, e );
                return render::error( &format!( "{:#}", e ) );
            }
        };

        let title = acquired.title.clone();
        let item = QueueItem::new( reference, acquired.title, self.requester.as_str(), acquired.path.clone() );

        match self.jukebox.enqueue( item ).await {
            Ok( position ) => render::added( position, &title ),
            Err( e ) => {
                // Not queued, so nothing else will clean it up
                if let Err( remove_err ) = std::fs::remove_file( &acquired.path ) {
                    tracing::warn!( "Failed to delete {}: {}", acquired.path.display(), remove_err );
                }
                render::error( &e )
            }
        }
    }
}


/// Prints announcements for playback events until the channel closes.
async fn announce( mut events: broadcast::Receiver<PlayerEvent> ) {
    loop {
        match events.recv().await {
            Ok( event ) => {
                if let Some( msg ) = render::event( &event ) {
                    println!( "{}", msg );
                }
            }
            Err( broadcast::error::RecvError::Lagged( missed ) ) => {
                tracing::debug!( "Missed {} playback event(s)", missed );
            }
            Err( broadcast::error::RecvError::Closed ) => break,
        }
    }
}


fn init_logging( verbose: bool ) {
    let default_filter = if verbose {
        "sotd=debug,sotd_core=debug"
    } else {
        "sotd=info,sotd_core=info"
    };

    tracing_subscriber::registry()
        .with( EnvFilter::try_from_default_env().unwrap_or_else( |_| default_filter.into() ) )
        .with( tracing_subscriber::fmt::layer().with_writer( std::io::stderr ) )
        .init();
}


#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging( args.verbose );

    let mut settings = Settings::load( args.config.as_deref() );
    settings.apply_args( &args );

    let initial_volume = settings.volume.initial_level();
    let volume = VolumeController::new(
        initial_volume,
        settings.volume.step,
        settings.volume.mixer_controls(),
    );
    let jukebox = Jukebox::open( &settings.queue_file, settings.player.command(), volume )
        .await
        .with_context( || format!( "Failed to open queue {}", settings.queue_file.display() ) )?;
    let jukebox = Arc::new( jukebox );

    // Push the configured level to the device; a failure here only degrades
    match jukebox.set_volume( i32::from( initial_volume ) ).await {
        Ok( outcome ) if !outcome.is_applied() => {
            tracing::warn!( "Could not apply startup volume {}%", outcome.level() );
        }
        Ok( _ ) => {}
        Err( e ) => tracing::warn!( "Could not apply startup volume: {}", e ),
    }

    let app = Arc::new( App {
        jukebox: Arc::clone( &jukebox ),
        fetcher: Fetcher::new( settings.fetcher.program.clone(), settings.download_dir.clone() ),
        requester: settings.requester.clone(),
    });

    let ( shutdown_tx, shutdown_rx ) = watch::channel( false );
    let scheduler = tokio::spawn( jukebox.scheduler( settings.poll_interval() ).run( shutdown_rx ) );
    let announcer = tokio::spawn( announce( jukebox.subscribe() ) );

    tracing::info!( "K&S SOTD started and ready to serve ({} queued)", jukebox.status().await.queue.len() );

    let mut lines = BufReader::new( tokio::io::stdin() ).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!( ctrl_c );

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context( "Failed to read from stdin" )?,
            _ = &mut ctrl_c => {
                tracing::info!( "Interrupted" );
                break;
            }
        };

        let Some( line ) = line else {
            // Keep playing what is queued until interrupted
            tracing::info!( "Input closed, press Ctrl-C to quit" );
            if let Err( e ) = ( &mut ctrl_c ).await {
                tracing::warn!( "Failed to wait for Ctrl-C: {}", e );
            }
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        match Command::parse( &line ) {
            Ok( command ) => {
                tracing::debug!( "Command from {}: {:?}", app.requester, command );
                let app = Arc::clone( &app );
                tokio::spawn( async move {
                    let reply = app.dispatch( command ).await;
                    println!( "{}", reply );
                });
            }
            Err( e ) => println!( "{}", render::error( &e ) ),
        }
    }

    let _ = shutdown_tx.send( true );
    scheduler.await.context( "Scheduler task failed" )?;
    announcer.abort();

    Ok(())
}
