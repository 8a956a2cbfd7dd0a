//! Chat command parsing.
//!
//! Commands arrive as chat text such as `!add <url>` or `!vol up`.
//! Parsing only produces a `Command`; executing it is up to the caller.

use std::str::FromStr;

use thiserror::Error;


/// Errors that can occur during command parsing.
#[derive( Debug, Error )]
pub enum CommandError {
    #[error( "Unknown command: {0}" )]
    Unknown( String ),

    #[error( "Invalid argument: {0}" )]
    InvalidArgument( String ),

    #[error( "Missing argument: {0}" )]
    MissingArgument( String ),
}


/// Parsed chat command.
#[derive( Debug, Clone, PartialEq, Eq )]
pub enum Command {
    // Queue commands
    Add { reference: String },
    Queue,
    Clear,

    // Playback commands
    NowPlaying,
    Skip,
    Stop,

    // Output commands
    Volume { change: Option<VolumeChange> },
    Help,
}


/// Volume argument for parsing.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum VolumeChange {
    Set( i32 ),
    Up,
    Down,
}


impl FromStr for VolumeChange {
    type Err = CommandError;


    fn from_str( s: &str ) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "up" | "+" => Ok( VolumeChange::Up ),
            "down" | "-" => Ok( VolumeChange::Down ),
            other => other.trim_end_matches( '%' )
                .parse()
                .map( VolumeChange::Set )
                .map_err( |_| CommandError::InvalidArgument(
                    format!( "Invalid volume: '{}'. Use 0-100, 'up' or 'down'", s )
                )),
        }
    }
}


impl Command {
    /// Parses a chat line, with or without the leading `!` or `/`.
    ///
    /// @param input - The chat text to parse
    ///
    /// @returns The parsed command or an error
    pub fn parse( input: &str ) -> Result<Self, CommandError> {
        let input = input.trim();
        let input = input.strip_prefix( [ '!', '/' ] ).unwrap_or( input );
        let mut parts = input.splitn( 2, char::is_whitespace );
        let cmd = parts.next().unwrap_or( "" ).to_lowercase();
        let args = parts.next().map( |s| s.trim() ).filter( |s| !s.is_empty() );

        match cmd.as_str() {
            "add" | "play" | "a" => {
                let reference = args
                    .ok_or_else( || CommandError::MissingArgument( "url".into() ) )?;
                Ok( Command::Add { reference: reference.to_string() } )
            }
            "queue" | "q" | "list" => Ok( Command::Queue ),
            "clear" | "cl" => Ok( Command::Clear ),

            "nowplaying" | "np" | "now" => Ok( Command::NowPlaying ),
            "skip" | "next" | "s" => Ok( Command::Skip ),
            "stop" | "st" => Ok( Command::Stop ),

            "vol" | "volume" | "v" => {
                let change = args.map( |s| s.parse() ).transpose()?;
                Ok( Command::Volume { change } )
            }
            "help" | "h" | "?" => Ok( Command::Help ),

            "" => Err( CommandError::Unknown( "empty command".into() ) ),
            other => Err( CommandError::Unknown( other.to_string() ) ),
        }
    }
}


/// Returns help text listing all available commands.
pub fn help_text() -> &'static str {
    r#"Queue Commands:
  !add <url>      Add a song to the queue
  !queue          Show current queue
  !clear          Clear the entire queue

Playback Commands:
  !nowplaying     Show currently playing song
  !skip           Skip current song
  !stop           Stop playback and clear queue

Other Commands:
  !vol [0-100]    Show or set volume
  !vol up|down    Nudge volume
  !help           Show this help"#
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_add() {
        let cmd = Command::parse( "!add https://youtu.be/abc" ).unwrap();
        assert_eq!( cmd, Command::Add { reference: "https://youtu.be/abc".into() } );
    }


    #[test]
    fn test_parse_without_prefix() {
        assert_eq!( Command::parse( "skip" ).unwrap(), Command::Skip );
        assert_eq!( Command::parse( "/stop" ).unwrap(), Command::Stop );
    }


    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!( Command::parse( "!QUEUE" ).unwrap(), Command::Queue );
        assert_eq!( Command::parse( "  !NowPlaying  " ).unwrap(), Command::NowPlaying );
    }


    #[test]
    fn test_parse_volume_level() {
        let cmd = Command::parse( "!vol 75" ).unwrap();
        assert_eq!( cmd, Command::Volume { change: Some( VolumeChange::Set( 75 ) ) } );

        let cmd = Command::parse( "!volume 30%" ).unwrap();
        assert_eq!( cmd, Command::Volume { change: Some( VolumeChange::Set( 30 ) ) } );
    }


    #[test]
    fn test_parse_volume_out_of_range_is_left_to_controller() {
        let cmd = Command::parse( "!vol 150" ).unwrap();
        assert_eq!( cmd, Command::Volume { change: Some( VolumeChange::Set( 150 ) ) } );
    }


    #[test]
    fn test_parse_volume_nudge() {
        assert_eq!(
            Command::parse( "!vol up" ).unwrap(),
            Command::Volume { change: Some( VolumeChange::Up ) }
        );
        assert_eq!(
            Command::parse( "!vol -" ).unwrap(),
            Command::Volume { change: Some( VolumeChange::Down ) }
        );
        assert_eq!( Command::parse( "!vol" ).unwrap(), Command::Volume { change: None } );
    }


    #[test]
    fn test_parse_volume_garbage() {
        let result = Command::parse( "!vol loud" );
        assert!( matches!( result, Err( CommandError::InvalidArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_unknown() {
        let result = Command::parse( "!foobar" );
        assert!( matches!( result, Err( CommandError::Unknown( _ ) ) ) );

        let result = Command::parse( "!" );
        assert!( matches!( result, Err( CommandError::Unknown( _ ) ) ) );
    }


    #[test]
    fn test_parse_missing_arg() {
        let result = Command::parse( "!add" );
        assert!( matches!( result, Err( CommandError::MissingArgument( _ ) ) ) );

        let result = Command::parse( "!add    " );
        assert!( matches!( result, Err( CommandError::MissingArgument( _ ) ) ) );
    }


    #[test]
    fn test_help_lists_every_command() {
        let help = help_text();
        for name in [ "!add", "!queue", "!clear", "!nowplaying", "!skip", "!stop", "!vol", "!help" ] {
            assert!( help.contains( name ), "missing {}", name );
        }
    }
}
