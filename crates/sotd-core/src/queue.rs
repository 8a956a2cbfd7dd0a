//! Durable song queue
//!
//! Holds the pending items in FIFO order and rewrites the queue file
//! on every mutation.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{ Path, PathBuf };

use chrono::{ DateTime, Utc };
use serde::{ Deserialize, Serialize };
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;


/// Errors that can occur with queue operations.
#[derive( Debug, Error )]
pub enum QueueError {
    #[error( "Failed to persist queue to {}: {source}", path.display() )]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error( "Queue file {} is malformed: {source}", path.display() )]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}


/// A song waiting to be played.
///
/// Items are immutable once created. Their identity is their position
/// in the queue.
#[derive( Debug, Clone, PartialEq, Eq, Serialize, Deserialize )]
pub struct QueueItem {
    reference: String,
    title: String,
    requested_by: String,
    local_file_path: PathBuf,
    enqueued_at: DateTime<Utc>,
}


impl QueueItem {
    /// Creates an item for a freshly acquired file, stamped with the current time.
    pub fn new(
        reference: impl Into<String>,
        title: impl Into<String>,
        requested_by: impl Into<String>,
        local_file_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            reference: reference.into(),
            title: title.into(),
            requested_by: requested_by.into(),
            local_file_path: local_file_path.into(),
            enqueued_at: Utc::now(),
        }
    }


    /// The reference (usually a URL) the item was acquired from.
    pub fn reference( &self ) -> &str {
        &self.reference
    }


    pub fn title( &self ) -> &str {
        &self.title
    }


    pub fn requested_by( &self ) -> &str {
        &self.requested_by
    }


    /// Path of the playable file backing this item.
    pub fn local_file_path( &self ) -> &Path {
        &self.local_file_path
    }


    pub fn enqueued_at( &self ) -> DateTime<Utc> {
        self.enqueued_at
    }
}


/// FIFO queue persisted as a JSON array.
///
/// Each mutation holds the lock until the queue file has been rewritten,
/// so mutations are linearizable and never observed half-applied.
#[derive( Debug )]
pub struct QueueStore {
    path: PathBuf,
    items: Mutex<VecDeque<QueueItem>>,
}


impl QueueStore {
    /// Opens the queue stored at `path`.
    ///
    /// A missing file is an empty queue.
    pub async fn open( path: impl Into<PathBuf> ) -> Result<Self, QueueError> {
        let path = path.into();

        let items = match fs::read( &path ).await {
            Ok( bytes ) if bytes.iter().all( u8::is_ascii_whitespace ) => VecDeque::new(),
            Ok( bytes ) => serde_json::from_slice( &bytes )
                .map_err( |source| QueueError::Corrupt { path: path.clone(), source } )?,
            Err( e ) if e.kind() == ErrorKind::NotFound => VecDeque::new(),
            Err( source ) => return Err( QueueError::Persistence { path, source } ),
        };

        tracing::info!( "Loaded {} queued item(s) from {}", items.len(), path.display() );

        Ok( Self {
            path,
            items: Mutex::new( items ),
        })
    }


    /// Appends an item to the tail.
    ///
    /// @returns The 1-based position of the item (queue length after insert)
    pub async fn append( &self, item: QueueItem ) -> Result<usize, QueueError> {
        let mut items = self.items.lock().await;
        items.push_back( item );

        if let Err( e ) = self.persist( &items ).await {
            items.pop_back();
            return Err( e );
        }

        Ok( items.len() )
    }


    /// Removes and returns the head item, if any.
    pub async fn pop_front( &self ) -> Result<Option<QueueItem>, QueueError> {
        let mut items = self.items.lock().await;
        let Some( item ) = items.pop_front() else {
            return Ok( None );
        };

        if let Err( e ) = self.persist( &items ).await {
            items.push_front( item );
            return Err( e );
        }

        Ok( Some( item ) )
    }


    /// Returns a copy of the queue in play order.
    pub async fn snapshot( &self ) -> Vec<QueueItem> {
        self.items.lock().await.iter().cloned().collect()
    }


    /// Empties the queue.
    ///
    /// @returns The removed items, in queue order
    pub async fn clear( &self ) -> Result<Vec<QueueItem>, QueueError> {
        let mut items = self.items.lock().await;
        let removed = std::mem::take( &mut *items );

        if let Err( e ) = self.persist( &items ).await {
            *items = removed;
            return Err( e );
        }

        Ok( removed.into() )
    }


    pub async fn len( &self ) -> usize {
        self.items.lock().await.len()
    }


    pub async fn is_empty( &self ) -> bool {
        self.items.lock().await.is_empty()
    }


    /// Rewrites the whole queue file.
    ///
    /// The content goes to a sibling temp file first and is renamed over
    /// the target, so readers see either the old or the new queue.
    async fn persist( &self, items: &VecDeque<QueueItem> ) -> Result<(), QueueError> {
        let result: std::io::Result<()> = async {
            if let Some( parent ) = self.path.parent().filter( |p| !p.as_os_str().is_empty() ) {
                fs::create_dir_all( parent ).await?;
            }

            let json = serde_json::to_vec_pretty( items )?;
            let temp_path = self.temp_path();

            let mut file = fs::File::create( &temp_path ).await?;
            file.write_all( &json ).await?;
            file.sync_all().await?;
            drop( file );

            fs::rename( &temp_path, &self.path ).await
        }.await;

        result.map_err( |source| {
            tracing::error!( "Failed to write queue file {}: {}", self.path.display(), source );
            QueueError::Persistence { path: self.path.clone(), source }
        })
    }


    fn temp_path( &self ) -> PathBuf {
        let mut name = self.path.file_name()
            .map( |n| n.to_os_string() )
            .unwrap_or_else( || OsString::from( "queue" ) );
        name.push( ".tmp" );
        self.path.with_file_name( name )
    }
}


#[cfg( test )]
mod tests {
    use super::*;

    use tempfile::TempDir;


    fn item( title: &str ) -> QueueItem {
        QueueItem::new(
            format!( "https://example.com/{}", title ),
            title,
            "tester",
            format!( "/tmp/{}.mp3", title ),
        )
    }


    fn titles( items: &[QueueItem] ) -> Vec<&str> {
        items.iter().map( |i| i.title() ).collect()
    }


    #[tokio::test]
    async fn test_missing_file_is_empty_queue() {
        let dir = TempDir::new().unwrap();
        let store = QueueStore::open( dir.path().join( "queue.json" ) ).await.unwrap();
        assert!( store.is_empty().await );
        assert!( store.snapshot().await.is_empty() );
    }


    #[tokio::test]
    async fn test_append_returns_position() {
        let dir = TempDir::new().unwrap();
        let store = QueueStore::open( dir.path().join( "queue.json" ) ).await.unwrap();

        assert_eq!( store.append( item( "a" ) ).await.unwrap(), 1 );
        assert_eq!( store.append( item( "b" ) ).await.unwrap(), 2 );
        assert_eq!( store.append( item( "c" ) ).await.unwrap(), 3 );
    }


    #[tokio::test]
    async fn test_fifo_order() {
        let dir = TempDir::new().unwrap();
        let store = QueueStore::open( dir.path().join( "queue.json" ) ).await.unwrap();

        for title in [ "a", "b", "c" ] {
            store.append( item( title ) ).await.unwrap();
        }
        assert_eq!( titles( &store.snapshot().await ), vec![ "a", "b", "c" ] );

        assert_eq!( store.pop_front().await.unwrap().unwrap().title(), "a" );
        assert_eq!( store.pop_front().await.unwrap().unwrap().title(), "b" );
        assert_eq!( store.pop_front().await.unwrap().unwrap().title(), "c" );
        assert!( store.pop_front().await.unwrap().is_none() );
    }


    #[tokio::test]
    async fn test_clear_empties_queue() {
        let dir = TempDir::new().unwrap();
        let store = QueueStore::open( dir.path().join( "queue.json" ) ).await.unwrap();
        store.append( item( "a" ) ).await.unwrap();
        store.append( item( "b" ) ).await.unwrap();

        let removed = store.clear().await.unwrap();
        assert_eq!( titles( &removed ), vec![ "a", "b" ] );
        assert!( store.snapshot().await.is_empty() );

        // Clearing an empty queue is fine too
        assert!( store.clear().await.unwrap().is_empty() );
    }


    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join( "nested" ).join( "queue.json" );

        {
            let store = QueueStore::open( &path ).await.unwrap();
            store.append( item( "a" ) ).await.unwrap();
            store.append( item( "b" ) ).await.unwrap();
            store.append( item( "c" ) ).await.unwrap();
            store.pop_front().await.unwrap();
        }

        let reopened = QueueStore::open( &path ).await.unwrap();
        let items = reopened.snapshot().await;
        assert_eq!( titles( &items ), vec![ "b", "c" ] );
        assert_eq!( items[ 0 ].requested_by(), "tester" );
        assert_eq!( items[ 0 ].local_file_path(), Path::new( "/tmp/b.mp3" ) );
        assert!( !reopened.temp_path().exists() );
    }


    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join( "queue.json" );
        std::fs::write( &path, "{ not json" ).unwrap();

        let result = QueueStore::open( &path ).await;
        assert!( matches!( result, Err( QueueError::Corrupt { .. } ) ) );
    }


    #[tokio::test]
    async fn test_failed_write_rolls_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join( "queue.json" );
        let store = QueueStore::open( &path ).await.unwrap();
        store.append( item( "a" ) ).await.unwrap();

        // A directory squatting on the temp path makes every rewrite fail
        std::fs::create_dir( store.temp_path() ).unwrap();

        let result = store.append( item( "b" ) ).await;
        assert!( matches!( result, Err( QueueError::Persistence { .. } ) ) );
        assert_eq!( titles( &store.snapshot().await ), vec![ "a" ] );

        let result = store.pop_front().await;
        assert!( matches!( result, Err( QueueError::Persistence { .. } ) ) );
        assert_eq!( titles( &store.snapshot().await ), vec![ "a" ] );

        let result = store.clear().await;
        assert!( result.is_err() );
        assert_eq!( titles( &store.snapshot().await ), vec![ "a" ] );

        // Durable state still matches memory
        drop( store );
        let reopened = QueueStore::open( &path ).await.unwrap();
        assert_eq!( titles( &reopened.snapshot().await ), vec![ "a" ] );
    }


    #[tokio::test]
    async fn test_concurrent_appends_are_not_lost() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join( "queue.json" );
        let store = std::sync::Arc::new( QueueStore::open( &path ).await.unwrap() );

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = std::sync::Arc::clone( &store );
            handles.push( tokio::spawn( async move {
                store.append( item( &format!( "song{}", i ) ) ).await.unwrap()
            }));
        }

        let mut positions = Vec::new();
        for handle in handles {
            positions.push( handle.await.unwrap() );
        }
        positions.sort_unstable();
        assert_eq!( positions, ( 1..=16 ).collect::<Vec<_>>() );

        let reopened = QueueStore::open( &path ).await.unwrap();
        assert_eq!( reopened.len().await, 16 );
    }
}
