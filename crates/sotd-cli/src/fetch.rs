//! Media acquisition
//!
//! Turns a reference into a local mp3 in the download directory, either
//! by running yt-dlp or, for a path to an existing file, by copying it.
//! The player deletes files after playing, so local files are never
//! queued in place.

use std::path::{ Path, PathBuf };
use std::process::Stdio;

use anyhow::{ bail, Context, Result };
use tokio::fs;
use tokio::process::Command;


/// A downloaded song ready to be queued.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct Acquired {
    pub title: String,
    pub path: PathBuf,
}


pub struct Fetcher {
    program: String,
    download_dir: PathBuf,
}


impl Fetcher {
    pub fn new( program: impl Into<String>, download_dir: impl Into<PathBuf> ) -> Self {
        Self {
            program: program.into(),
            download_dir: download_dir.into(),
        }
    }


    /// Acquires `reference`, a URL or a path to a local audio file.
    pub async fn fetch( &self, reference: &str ) -> Result<Acquired> {
        fs::create_dir_all( &self.download_dir ).await
            .with_context( || format!( "Failed to create {}", self.download_dir.display() ) )?;

        let local = Path::new( reference );
        if local.is_file() {
            self.copy_local( local ).await
        } else {
            self.download( reference ).await
        }
    }


    async fn download( &self, url: &str ) -> Result<Acquired> {
        tracing::info!( "Downloading {}", url );

        let template = self.download_dir.join( "%(id)s.%(ext)s" );
        let output = Command::new( &self.program )
            .args( [ "--no-playlist", "--no-warnings", "--extract-audio" ] )
            .args( [ "--audio-format", "mp3", "--audio-quality", "192K" ] )
            .arg( "--output" ).arg( &template )
            .args( [ "--print", "after_move:title", "--print", "after_move:filepath" ] )
            .arg( "--" ).arg( url )
            .stdin( Stdio::null() )
            .stdout( Stdio::piped() )
            .stderr( Stdio::piped() )
            .output()
            .await
            .with_context( || format!( "Failed to run {}", self.program ) )?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy( &output.stderr );
            let reason = stderr.lines().rev().find( |l| !l.trim().is_empty() ).unwrap_or( "no output" );
            bail!( "{} failed ({}): {}", self.program, output.status, reason.trim() );
        }

        let acquired = parse_download_output( &String::from_utf8_lossy( &output.stdout ) )?;
        if !acquired.path.is_file() {
            bail!( "Could not find downloaded file\nExpected: {}", acquired.path.display() );
        }

        tracing::debug!( "Downloaded {} to {}", acquired.title, acquired.path.display() );
        Ok( acquired )
    }


    async fn copy_local( &self, source: &Path ) -> Result<Acquired> {
        let title = source.file_stem()
            .map( |s| s.to_string_lossy().into_owned() )
            .unwrap_or_else( || source.display().to_string() );
        let file_name = source.file_name()
            .map( |s| s.to_string_lossy().into_owned() )
            .unwrap_or_else( || "song.mp3".to_string() );

        // Prefix keeps repeated adds of the same file apart
        let stamp = chrono::Utc::now().timestamp_millis();
        let path = self.download_dir.join( format!( "{}-{}", stamp, file_name ) );

        fs::copy( source, &path ).await
            .with_context( || format!( "Failed to copy {}", source.display() ) )?;

        Ok( Acquired { title, path } )
    }
}


/// Reads the title and final file path printed by yt-dlp.
fn parse_download_output( stdout: &str ) -> Result<Acquired> {
    let mut lines = stdout.lines().map( str::trim ).filter( |l| !l.is_empty() );

    let title = lines.next().context( "Downloader printed no title" )?;
    let path = lines.next().context( "Downloader printed no file path" )?;

    Ok( Acquired {
        title: title.to_string(),
        path: PathBuf::from( path ),
    })
}


#[cfg( test )]
mod tests {
    use super::*;

    use tempfile::TempDir;


    #[test]
    fn test_parse_download_output() {
        let acquired = parse_download_output( "Song Title\n/tmp/downloads/abc123.mp3\n" ).unwrap();
        assert_eq!( acquired.title, "Song Title" );
        assert_eq!( acquired.path, PathBuf::from( "/tmp/downloads/abc123.mp3" ) );
    }


    #[test]
    fn test_parse_download_output_skips_blank_lines() {
        let acquired = parse_download_output( "\n  Song  \n\n/x/y.mp3" ).unwrap();
        assert_eq!( acquired.title, "Song" );
        assert_eq!( acquired.path, PathBuf::from( "/x/y.mp3" ) );
    }


    #[test]
    fn test_parse_download_output_missing_path() {
        assert!( parse_download_output( "only a title\n" ).is_err() );
        assert!( parse_download_output( "" ).is_err() );
    }


    #[tokio::test]
    async fn test_local_file_is_copied() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join( "Morning Song.mp3" );
        std::fs::write( &source, b"ID3" ).unwrap();

        let fetcher = Fetcher::new( "yt-dlp", dir.path().join( "downloads" ) );
        let acquired = fetcher.fetch( source.to_str().unwrap() ).await.unwrap();

        assert_eq!( acquired.title, "Morning Song" );
        assert!( acquired.path.starts_with( dir.path().join( "downloads" ) ) );
        assert!( acquired.path.is_file() );
        assert!( source.is_file() );
    }


    #[tokio::test]
    async fn test_missing_downloader() {
        let dir = TempDir::new().unwrap();
        let fetcher = Fetcher::new( "/nonexistent/yt-dlp", dir.path().join( "downloads" ) );

        let result = fetcher.fetch( "https://example.com/watch?v=abc" ).await;
        assert!( result.is_err() );
        assert_eq!( std::fs::read_dir( dir.path().join( "downloads" ) ).unwrap().count(), 0 );
    }
}
