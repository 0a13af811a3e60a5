use std::io;

pub mod directory;

pub use directory::DirectorySink;

#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("failed to write {file_name}: {source}")]
    Io {
        file_name: String,
        #[source]
        source: io::Error,
    },
    #[error("'{0}' is not a plain file name")]
    InvalidName(String),
}

/// Destination for rendered NEM12 files.
///
/// `persist` either stores the whole file or nothing and returns where it landed.
#[async_trait::async_trait]
pub trait Nem12Sink: Send + Sync {
    async fn persist(&self, file_name: &str, contents: Vec<u8>) -> Result<String, SinkError>;
}
