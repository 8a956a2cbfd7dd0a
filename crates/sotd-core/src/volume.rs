//! Output volume
//!
//! The level lives in memory and is pushed to the system mixer through
//! an ordered list of controls. The first control that accepts the level
//! wins; if none does, the level is still kept.

use std::process::Stdio;
use std::sync::atomic::{ AtomicU8, Ordering };

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Mutex;


pub const MAX_VOLUME: u8 = 100;
pub const DEFAULT_VOLUME: u8 = 50;
pub const DEFAULT_VOLUME_STEP: u8 = 10;


/// Errors that can occur when changing the volume.
#[derive( Debug, Error )]
pub enum VolumeError {
    #[error( "Invalid volume: {0} (expected 0-100)" )]
    InvalidVolume( i32 ),

    #[error( "Mixer control '{control}' failed: {message}" )]
    Control { control: String, message: String },
}


/// Result of a successful volume change.
#[derive( Debug, Clone, PartialEq, Eq )]
pub enum VolumeOutcome {
    /// Stored and applied through `control`.
    Applied { level: u8, control: String },
    /// Stored, but no mixer control took it.
    AppliedInMemoryOnly { level: u8 },
}


impl VolumeOutcome {
    pub fn level( &self ) -> u8 {
        match self {
            VolumeOutcome::Applied { level, .. } => *level,
            VolumeOutcome::AppliedInMemoryOnly { level } => *level,
        }
    }


    /// Returns true if the level reached the device.
    pub fn is_applied( &self ) -> bool {
        matches!( self, VolumeOutcome::Applied { .. } )
    }
}


/// One way of pushing a level to the output device.
#[async_trait]
pub trait MixerControl: Send + Sync {
    /// Name used in logs and outcomes.
    fn name( &self ) -> &str;

    /// Sets the device to `level` percent.
    async fn apply( &self, level: u8 ) -> Result<(), VolumeError>;
}


/// ALSA mixer control driven through `amixer`.
#[derive( Debug, Clone )]
pub struct Amixer {
    program: String,
    control: String,
}


impl Amixer {
    /// Creates a control for the named ALSA simple control (e.g. "Master").
    pub fn new( control: impl Into<String> ) -> Self {
        Self::with_program( "amixer", control )
    }


    pub fn with_program( program: impl Into<String>, control: impl Into<String> ) -> Self {
        Self {
            program: program.into(),
            control: control.into(),
        }
    }


    fn failure( &self, message: String ) -> VolumeError {
        VolumeError::Control { control: self.control.clone(), message }
    }
}


#[async_trait]
impl MixerControl for Amixer {
    fn name( &self ) -> &str {
        &self.control
    }


    async fn apply( &self, level: u8 ) -> Result<(), VolumeError> {
        let status = Command::new( &self.program )
            .args( [ "-q", "sset", self.control.as_str() ] )
            .arg( format!( "{}%", level ) )
            .stdin( Stdio::null() )
            .stdout( Stdio::null() )
            .stderr( Stdio::null() )
            .status()
            .await
            .map_err( |e| self.failure( format!( "could not run {}: {}", self.program, e ) ) )?;

        if status.success() {
            Ok(())
        } else {
            Err( self.failure( format!( "{} exited with {}", self.program, status ) ) )
        }
    }
}


/// Owns the process-wide volume level.
pub struct VolumeController {
    level: AtomicU8,
    step: u8,
    controls: Vec<Box<dyn MixerControl>>,
    // Serializes read-modify-write and device applies
    apply_lock: Mutex<()>,
}


impl VolumeController {
    /// Creates a controller starting at `initial` (clamped to 100).
    ///
    /// @param initial - Starting level, not applied to the device until the first set
    /// @param step - Amount `volume up`/`volume down` move the level by
    /// @param controls - Mixer controls, tried in order
    pub fn new( initial: u8, step: u8, controls: Vec<Box<dyn MixerControl>> ) -> Self {
        Self {
            level: AtomicU8::new( initial.min( MAX_VOLUME ) ),
            step,
            controls,
            apply_lock: Mutex::new( () ),
        }
    }


    /// Gets the current level (0-100).
    pub fn get( &self ) -> u8 {
        self.level.load( Ordering::SeqCst )
    }


    pub fn step( &self ) -> u8 {
        self.step
    }


    /// Sets the level.
    ///
    /// Out-of-range input is rejected and leaves the level unchanged.
    pub async fn set( &self, level: i32 ) -> Result<VolumeOutcome, VolumeError> {
        let level = u8::try_from( level )
            .ok()
            .filter( |l| *l <= MAX_VOLUME )
            .ok_or( VolumeError::InvalidVolume( level ) )?;

        let _guard = self.apply_lock.lock().await;
        Ok( self.store_and_apply( level ).await )
    }


    /// Moves the level by `delta`, clamped to 0-100.
    pub async fn adjust( &self, delta: i32 ) -> VolumeOutcome {
        let _guard = self.apply_lock.lock().await;
        let target = i32::from( self.get() ).saturating_add( delta ).clamp( 0, i32::from( MAX_VOLUME ) );
        // Clamped to 0-100 above
        self.store_and_apply( target as u8 ).await
    }


    async fn store_and_apply( &self, level: u8 ) -> VolumeOutcome {
        self.level.store( level, Ordering::SeqCst );

        for control in &self.controls {
            match control.apply( level ).await {
                Ok(()) => {
                    tracing::info!( "Volume set to {}% via {}", level, control.name() );
                    return VolumeOutcome::Applied {
                        level,
                        control: control.name().to_string(),
                    };
                }
                Err( e ) => tracing::debug!( "{}", e ),
            }
        }

        tracing::warn!( "Volume stored as {}% but no mixer control applied it", level );
        VolumeOutcome::AppliedInMemoryOnly { level }
    }
}


#[cfg( test )]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;


    struct FakeControl {
        name: &'static str,
        works: bool,
        calls: Arc<AtomicUsize>,
        last_level: Arc<AtomicU8>,
    }


    impl FakeControl {
        fn boxed( name: &'static str, works: bool ) -> ( Box<dyn MixerControl>, Arc<AtomicUsize>, Arc<AtomicU8> ) {
            let calls = Arc::new( AtomicUsize::new( 0 ) );
            let last_level = Arc::new( AtomicU8::new( 0 ) );
            let control = Self {
                name,
                works,
                calls: Arc::clone( &calls ),
                last_level: Arc::clone( &last_level ),
            };
            ( Box::new( control ), calls, last_level )
        }
    }


    #[async_trait]
    impl MixerControl for FakeControl {
        fn name( &self ) -> &str {
            self.name
        }


        async fn apply( &self, level: u8 ) -> Result<(), VolumeError> {
            self.calls.fetch_add( 1, Ordering::SeqCst );
            if self.works {
                self.last_level.store( level, Ordering::SeqCst );
                Ok(())
            } else {
                Err( VolumeError::Control {
                    control: self.name.to_string(),
                    message: "unavailable".to_string(),
                })
            }
        }
    }


    #[tokio::test]
    async fn test_set_in_range() {
        let ( master, calls, last ) = FakeControl::boxed( "Master", true );
        let volume = VolumeController::new( DEFAULT_VOLUME, DEFAULT_VOLUME_STEP, vec![ master ] );

        let outcome = volume.set( 70 ).await.unwrap();
        assert_eq!( outcome, VolumeOutcome::Applied { level: 70, control: "Master".to_string() } );
        assert_eq!( volume.get(), 70 );
        assert_eq!( calls.load( Ordering::SeqCst ), 1 );
        assert_eq!( last.load( Ordering::SeqCst ), 70 );
    }


    #[tokio::test]
    async fn test_set_out_of_range_is_rejected() {
        let ( master, calls, _ ) = FakeControl::boxed( "Master", true );
        let volume = VolumeController::new( 50, DEFAULT_VOLUME_STEP, vec![ master ] );

        assert!( matches!( volume.set( 150 ).await, Err( VolumeError::InvalidVolume( 150 ) ) ) );
        assert!( matches!( volume.set( -1 ).await, Err( VolumeError::InvalidVolume( -1 ) ) ) );
        assert_eq!( volume.get(), 50 );
        assert_eq!( calls.load( Ordering::SeqCst ), 0 );
    }


    #[tokio::test]
    async fn test_bounds_are_valid() {
        let volume = VolumeController::new( 50, DEFAULT_VOLUME_STEP, Vec::new() );
        assert_eq!( volume.set( 0 ).await.unwrap().level(), 0 );
        assert_eq!( volume.set( 100 ).await.unwrap().level(), 100 );
    }


    #[tokio::test]
    async fn test_falls_back_to_next_control() {
        let ( master, master_calls, _ ) = FakeControl::boxed( "Master", false );
        let ( pcm, pcm_calls, pcm_level ) = FakeControl::boxed( "PCM", true );
        let volume = VolumeController::new( 50, DEFAULT_VOLUME_STEP, vec![ master, pcm ] );

        let outcome = volume.set( 30 ).await.unwrap();
        assert_eq!( outcome, VolumeOutcome::Applied { level: 30, control: "PCM".to_string() } );
        assert_eq!( master_calls.load( Ordering::SeqCst ), 1 );
        assert_eq!( pcm_calls.load( Ordering::SeqCst ), 1 );
        assert_eq!( pcm_level.load( Ordering::SeqCst ), 30 );
    }


    #[tokio::test]
    async fn test_first_success_wins() {
        let ( master, _, _ ) = FakeControl::boxed( "Master", true );
        let ( pcm, pcm_calls, _ ) = FakeControl::boxed( "PCM", true );
        let volume = VolumeController::new( 50, DEFAULT_VOLUME_STEP, vec![ master, pcm ] );

        volume.set( 40 ).await.unwrap();
        assert_eq!( pcm_calls.load( Ordering::SeqCst ), 0 );
    }


    #[tokio::test]
    async fn test_all_controls_fail() {
        let ( master, _, _ ) = FakeControl::boxed( "Master", false );
        let ( pcm, _, _ ) = FakeControl::boxed( "PCM", false );
        let volume = VolumeController::new( 50, DEFAULT_VOLUME_STEP, vec![ master, pcm ] );

        let outcome = volume.set( 20 ).await.unwrap();
        assert_eq!( outcome, VolumeOutcome::AppliedInMemoryOnly { level: 20 } );
        assert!( !outcome.is_applied() );
        assert_eq!( volume.get(), 20 );
    }


    #[tokio::test]
    async fn test_no_controls_is_memory_only() {
        let volume = VolumeController::new( 50, DEFAULT_VOLUME_STEP, Vec::new() );
        assert_eq!( volume.set( 60 ).await.unwrap(), VolumeOutcome::AppliedInMemoryOnly { level: 60 } );
    }


    #[tokio::test]
    async fn test_adjust_clamps() {
        let volume = VolumeController::new( 95, DEFAULT_VOLUME_STEP, Vec::new() );
        assert_eq!( volume.adjust( 10 ).await.level(), 100 );
        assert_eq!( volume.get(), 100 );

        volume.set( 5 ).await.unwrap();
        assert_eq!( volume.adjust( -10 ).await.level(), 0 );
        assert_eq!( volume.get(), 0 );
    }


    #[tokio::test]
    async fn test_adjust_extreme_deltas() {
        let volume = VolumeController::new( 50, DEFAULT_VOLUME_STEP, Vec::new() );
        assert_eq!( volume.adjust( i32::MAX ).await.level(), 100 );
        assert_eq!( volume.adjust( i32::MIN ).await.level(), 0 );
        assert_eq!( volume.get(), 0 );
    }


    #[tokio::test]
    async fn test_initial_level_is_clamped() {
        let volume = VolumeController::new( 250, DEFAULT_VOLUME_STEP, Vec::new() );
        assert_eq!( volume.get(), 100 );
    }


    #[cfg( unix )]
    #[tokio::test]
    async fn test_amixer_missing_binary() {
        let control = Amixer::with_program( "/nonexistent/amixer", "Master" );
        let result = control.apply( 50 ).await;
        assert!( matches!( result, Err( VolumeError::Control { ref control, .. } ) if control == "Master" ) );
    }
}
