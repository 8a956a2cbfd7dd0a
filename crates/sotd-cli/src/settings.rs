//! Application settings management
//!
//! Settings live in a JSON file under the user's config directory.
//! Command-line arguments override individual fields.

use std::fs;
use std::path::{ Path, PathBuf };
use std::time::Duration;

use serde::{ Deserialize, Serialize };

use sotd_core::volume::{ DEFAULT_VOLUME, DEFAULT_VOLUME_STEP, MAX_VOLUME };
use sotd_core::{ Amixer, MixerControl, PlayerCommand };

use crate::cli::Args;


/// Application settings.
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct Settings {
    /// Durable queue file
    pub queue_file: PathBuf,

    /// Where downloaded songs are kept until played
    pub download_dir: PathBuf,

    /// Name recorded as the requester of added songs
    pub requester: String,

    /// Scheduler period in milliseconds
    pub poll_interval_ms: u64,

    pub player: PlayerSettings,
    pub fetcher: FetcherSettings,
    pub volume: VolumeSettings,
}


/// External player invocation.
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct PlayerSettings {
    pub program: String,
    pub args: Vec<String>,
}


/// Media downloader.
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct FetcherSettings {
    pub program: String,
}


#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct VolumeSettings {
    /// Level applied at startup (0-100)
    pub initial: u8,

    /// Amount `!vol up` / `!vol down` move the level by
    pub step: u8,

    /// Mixer program
    pub mixer: String,

    /// Mixer controls, tried in order until one works
    pub controls: Vec<String>,
}


impl Default for Settings {
    fn default() -> Self {
        let data_dir = Self::data_dir();
        Self {
            queue_file: data_dir.join( "music_queue.json" ),
            download_dir: data_dir.join( "downloads" ),
            requester: std::env::var( "USER" ).unwrap_or_else( |_| "local".to_string() ),
            poll_interval_ms: 2000,
            player: PlayerSettings::default(),
            fetcher: FetcherSettings::default(),
            volume: VolumeSettings::default(),
        }
    }
}


impl Default for PlayerSettings {
    fn default() -> Self {
        let command = PlayerCommand::default();
        Self {
            program: command.program,
            args: command.args,
        }
    }
}


impl Default for FetcherSettings {
    fn default() -> Self {
        Self { program: "yt-dlp".to_string() }
    }
}


impl Default for VolumeSettings {
    fn default() -> Self {
        Self {
            initial: DEFAULT_VOLUME,
            step: DEFAULT_VOLUME_STEP,
            mixer: "amixer".to_string(),
            controls: vec![ "Master".to_string(), "PCM".to_string() ],
        }
    }
}


impl Settings {
    /// Returns the path to the default settings file.
    pub fn settings_path() -> Option<PathBuf> {
        dirs::config_dir().map( |p| p.join( "sotd" ).join( "settings.json" ) )
    }


    fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .map( |d| d.join( "sotd" ) )
            .unwrap_or_else( || PathBuf::from( "." ) )
    }


    /// Loads settings from `path` (or the default location), or returns defaults.
    ///
    /// A missing default settings file is created with the defaults so it can be edited.
    pub fn load( path: Option<&Path> ) -> Self {
        let ( path, is_default ) = match path {
            Some( p ) => ( p.to_path_buf(), false ),
            None => match Self::settings_path() {
                Some( p ) => ( p, true ),
                None => return Self::default(),
            },
        };

        if !path.exists() {
            let settings = Self::default();
            if is_default {
                settings.save( &path );
            } else {
                tracing::warn!( "Settings file {} not found, using defaults", path.display() );
            }
            return settings;
        }

        match fs::read_to_string( &path ) {
            Ok( contents ) => serde_json::from_str( &contents ).unwrap_or_else( |e| {
                tracing::warn!( "Ignoring malformed settings {}: {}", path.display(), e );
                Self::default()
            }),
            Err( e ) => {
                tracing::warn!( "Failed to read settings: {}", e );
                Self::default()
            }
        }
    }


    /// Saves settings to `path`.
    pub fn save( &self, path: &Path ) {
        // Create parent directory if needed
        if let Some( parent ) = path.parent() {
            if !parent.exists() {
                if let Err( e ) = fs::create_dir_all( parent ) {
                    tracing::warn!( "Failed to create settings directory: {}", e );
                    return;
                }
            }
        }

        match serde_json::to_string_pretty( self ) {
            Ok( json ) => {
                if let Err( e ) = fs::write( path, json ) {
                    tracing::warn!( "Failed to save settings: {}", e );
                } else {
                    tracing::info!( "Wrote default settings to {}", path.display() );
                }
            }
            Err( e ) => {
                tracing::warn!( "Failed to serialize settings: {}", e );
            }
        }
    }


    /// Applies command-line overrides.
    pub fn apply_args( &mut self, args: &Args ) {
        if let Some( queue_file ) = &args.queue_file {
            self.queue_file = queue_file.clone();
        }
        if let Some( download_dir ) = &args.download_dir {
            self.download_dir = download_dir.clone();
        }
        if let Some( player ) = &args.player {
            self.player.program = player.clone();
        }
        if let Some( volume ) = args.volume {
            self.volume.initial = volume;
        }
        if let Some( user ) = &args.user {
            self.requester = user.clone();
        }
    }


    pub fn poll_interval( &self ) -> Duration {
        Duration::from_millis( self.poll_interval_ms )
    }
}


impl PlayerSettings {
    pub fn command( &self ) -> PlayerCommand {
        PlayerCommand {
            program: self.program.clone(),
            args: self.args.clone(),
        }
    }
}


impl VolumeSettings {
    /// Startup level, capped at the top of the volume range.
    pub fn initial_level( &self ) -> u8 {
        if self.initial > MAX_VOLUME {
            tracing::warn!( "Startup volume {}% is out of range, using {}%", self.initial, MAX_VOLUME );
            return MAX_VOLUME;
        }
        self.initial
    }


    /// Builds the mixer controls in fallback order.
    pub fn mixer_controls( &self ) -> Vec<Box<dyn MixerControl>> {
        self.controls.iter()
            .map( |c| Box::new( Amixer::with_program( self.mixer.clone(), c.clone() ) ) as Box<dyn MixerControl> )
            .collect()
    }
}


#[cfg( test )]
mod tests {
    use super::*;

    use tempfile::TempDir;


    #[test]
    fn test_missing_explicit_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join( "settings.json" );

        let settings = Settings::load( Some( &path ) );
        assert_eq!( settings, Settings::default() );
        // Only the default location gets a file written
        assert!( !path.exists() );
    }


    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join( "settings.json" );
        fs::write( &path, r#"{ "player": { "program": "mpv" }, "volume": { "step": 5 } }"# ).unwrap();

        let settings = Settings::load( Some( &path ) );
        assert_eq!( settings.player.program, "mpv" );
        assert!( settings.player.args.is_empty() );
        assert_eq!( settings.volume.step, 5 );
        assert_eq!( settings.volume.initial, DEFAULT_VOLUME );
        assert_eq!( settings.volume.controls, vec![ "Master", "PCM" ] );
        assert_eq!( settings.fetcher.program, "yt-dlp" );
    }


    #[test]
    fn test_malformed_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join( "settings.json" );
        fs::write( &path, "not json at all" ).unwrap();

        assert_eq!( Settings::load( Some( &path ) ), Settings::default() );
    }


    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join( "nested" ).join( "settings.json" );

        let mut settings = Settings::default();
        settings.poll_interval_ms = 500;
        settings.volume.controls = vec![ "Speaker".to_string() ];
        settings.save( &path );

        let loaded = Settings::load( Some( &path ) );
        assert_eq!( loaded, settings );
        assert_eq!( loaded.poll_interval(), Duration::from_millis( 500 ) );
        assert_eq!( loaded.volume.mixer_controls().len(), 1 );
    }


    #[test]
    fn test_args_override_settings() {
        let mut settings = Settings::default();
        let args = Args {
            queue_file: Some( PathBuf::from( "/srv/sotd/queue.json" ) ),
            player: Some( "ffplay".to_string() ),
            volume: Some( 80 ),
            user: Some( "kim".to_string() ),
            ..Args::default()
        };

        settings.apply_args( &args );
        assert_eq!( settings.queue_file, PathBuf::from( "/srv/sotd/queue.json" ) );
        assert_eq!( settings.player.program, "ffplay" );
        assert_eq!( settings.volume.initial, 80 );
        assert_eq!( settings.requester, "kim" );
        assert_eq!( settings.download_dir, Settings::default().download_dir );
    }


    #[test]
    fn test_initial_level_above_range_is_capped() {
        let mut settings = Settings::default();
        settings.volume.initial = 150;
        assert_eq!( settings.volume.initial_level(), 100 );

        settings.volume.initial = 35;
        assert_eq!( settings.volume.initial_level(), 35 );
    }
}
