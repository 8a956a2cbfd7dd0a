//! Chat reply formatting.

use std::fmt::Write;

use sotd_core::{ NowPlaying, PlaybackOutcome, PlayerEvent, Status, StopOutcome, VolumeOutcome };


pub fn added( position: usize, title: &str ) -> String {
    format!( "Added to queue (#{}): **{}**", position, title )
}


pub fn now_playing( now: Option<&NowPlaying> ) -> String {
    match now {
        Some( now ) => format!(
            "**Now Playing:** {}\nAdded by: {}",
            now.item.title(),
            now.item.requested_by()
        ),
        None => "Nothing is currently playing.".to_string(),
    }
}


pub fn queue( status: &Status ) -> String {
    let mut msg = match &status.now_playing {
        Some( now ) => format!(
            "**Now Playing:** {}\n   Added by: {}\n\n",
            now.item.title(),
            now.item.requested_by()
        ),
        None => "Nothing currently playing.\n\n".to_string(),
    };

    if status.queue.is_empty() {
        msg.push_str( "Queue is empty." );
    } else {
        msg.push_str( "**Queue:**\n" );
        for ( i, item ) in status.queue.iter().enumerate() {
            let _ = writeln!( msg, "{}. {}\n   Added by: {}", i + 1, item.title(), item.requested_by() );
        }
    }

    let _ = write!( msg, "\nVolume: {}%", status.volume );
    msg
}


pub fn skipped( skipped: bool ) -> String {
    let msg = if skipped { "Skipped!" } else { "Nothing is playing." };
    msg.to_string()
}


pub fn cleared( count: usize ) -> String {
    match count {
        0 => "Queue is already empty.".to_string(),
        1 => "Queue cleared! (1 song removed)".to_string(),
        n => format!( "Queue cleared! ({} songs removed)", n ),
    }
}


pub fn stopped( outcome: StopOutcome ) -> String {
    if outcome.terminated || outcome.cleared > 0 {
        "Stopped and cleared queue!".to_string()
    } else {
        "Nothing to stop.".to_string()
    }
}


pub fn volume_level( level: u8 ) -> String {
    format!( "Volume: {}%", level )
}


pub fn volume_changed( outcome: &VolumeOutcome ) -> String {
    match outcome {
        VolumeOutcome::Applied { level, .. } => format!( "Volume set to {}%", level ),
        VolumeOutcome::AppliedInMemoryOnly { level } => {
            format!( "Volume set to {}% (could not reach the output device)", level )
        }
    }
}


pub fn error( err: &dyn std::fmt::Display ) -> String {
    format!( "Error: {}", err )
}


/// Announcement for a playback event, if it is worth one.
pub fn event( event: &PlayerEvent ) -> Option<String> {
    match event {
        PlayerEvent::Started { item } => Some( format!(
            "**Now Playing:** {} (added by {})",
            item.title(),
            item.requested_by()
        )),
        PlayerEvent::Finished( finished ) => match &finished.outcome {
            PlaybackOutcome::LaunchFailed { message } => Some( format!(
                "Could not play {}: {}",
                finished.item.title(),
                message
            )),
            PlaybackOutcome::Failed { .. } => Some( format!(
                "Playback of {} ended with an error.",
                finished.item.title()
            )),
            PlaybackOutcome::Completed | PlaybackOutcome::Terminated => None,
        },
    }
}


#[cfg( test )]
mod tests {
    use super::*;

    use sotd_core::player::{ PlaybackFinished, PlaybackPhase };
    use sotd_core::QueueItem;


    fn item( title: &str, by: &str ) -> QueueItem {
        QueueItem::new( "https://example.com", title, by, "/tmp/song.mp3" )
    }


    #[test]
    fn test_queue_listing() {
        let status = Status {
            now_playing: Some( NowPlaying {
                item: item( "First", "ann" ),
                started_at: chrono::Utc::now(),
                phase: PlaybackPhase::Running,
            }),
            queue: vec![ item( "Second", "bob" ), item( "Third", "cy" ) ],
            volume: 40,
        };

        let text = queue( &status );
        assert!( text.starts_with( "**Now Playing:** First\n   Added by: ann" ) );
        assert!( text.contains( "1. Second\n   Added by: bob" ) );
        assert!( text.contains( "2. Third\n   Added by: cy" ) );
        assert!( text.ends_with( "Volume: 40%" ) );
    }


    #[test]
    fn test_empty_queue_listing() {
        let status = Status { now_playing: None, queue: Vec::new(), volume: 50 };
        let text = queue( &status );
        assert!( text.starts_with( "Nothing currently playing." ) );
        assert!( text.contains( "Queue is empty." ) );
    }


    #[test]
    fn test_volume_replies() {
        let applied = VolumeOutcome::Applied { level: 70, control: "Master".to_string() };
        assert_eq!( volume_changed( &applied ), "Volume set to 70%" );

        let degraded = VolumeOutcome::AppliedInMemoryOnly { level: 70 };
        assert!( volume_changed( &degraded ).contains( "could not reach" ) );
    }


    #[test]
    fn test_stop_replies() {
        assert_eq!( stopped( StopOutcome { terminated: true, cleared: 0 } ), "Stopped and cleared queue!" );
        assert_eq!( stopped( StopOutcome { terminated: false, cleared: 0 } ), "Nothing to stop." );
    }


    #[test]
    fn test_events() {
        let started = PlayerEvent::Started { item: item( "Song", "ann" ) };
        assert_eq!( event( &started ).unwrap(), "**Now Playing:** Song (added by ann)" );

        let completed = PlayerEvent::Finished( PlaybackFinished {
            item: item( "Song", "ann" ),
            outcome: PlaybackOutcome::Completed,
        });
        assert!( event( &completed ).is_none() );

        let failed = PlayerEvent::Finished( PlaybackFinished {
            item: item( "Song", "ann" ),
            outcome: PlaybackOutcome::LaunchFailed { message: "mpg123 not found".to_string() },
        });
        assert_eq!( event( &failed ).unwrap(), "Could not play Song: mpg123 not found" );
    }
}
