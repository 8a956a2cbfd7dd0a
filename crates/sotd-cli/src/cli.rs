//! Command-line argument parsing for sotd.

use std::path::PathBuf;

use clap::Parser;


/// sotd - a song-of-the-day jukebox fed from chat commands on stdin.
#[derive( Parser, Debug, Default )]
#[command( name = "sotd" )]
#[command( version, about, long_about = None )]
pub struct Args {
    /// Settings file to use instead of the default location.
    #[arg( short, long )]
    pub config: Option<PathBuf>,

    /// Queue file (overrides settings).
    #[arg( long )]
    pub queue_file: Option<PathBuf>,

    /// Directory downloaded songs are stored in (overrides settings).
    #[arg( long )]
    pub download_dir: Option<PathBuf>,

    /// Player program used for playback (overrides settings).
    #[arg( long )]
    pub player: Option<String>,

    /// Initial volume, 0-100 (overrides settings).
    #[arg( long, value_parser = clap::value_parser!( u8 ).range( 0..=100 ) )]
    pub volume: Option<u8>,

    /// Name recorded as the requester of added songs.
    #[arg( short, long )]
    pub user: Option<String>,

    /// Log at debug level.
    #[arg( short, long )]
    pub verbose: bool,
}
