use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use tokio::{fs, io::AsyncWriteExt};

use super::{Nem12Sink, SinkError};

/// Writes each file into one directory. Bytes land in a hidden `.partial` file
/// first and are renamed into place once flushed, so readers never observe a
/// half-written NEM12 file.
pub struct DirectorySink {
    dir: PathBuf,
    max_retries: u32,
    retry_backoff: Duration,
}

impl DirectorySink {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: dir.into(),
            max_retries: 2,
            retry_backoff: Duration::from_millis(250),
        }
    }

    pub fn with_retries(mut self, max_retries: u32, retry_backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff = retry_backoff;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn write_once(&self, file_name: &str, contents: &[u8]) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir).await?;
        let target = self.dir.join(file_name);
        let temp = self.dir.join(format!(".{file_name}.partial"));

        let result = async {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(contents).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp, &target).await
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&temp).await;
            return Err(e);
        }
        Ok(target)
    }
}

#[async_trait::async_trait]
impl Nem12Sink for DirectorySink {
    async fn persist(&self, file_name: &str, contents: Vec<u8>) -> Result<String, SinkError> {
        if file_name.contains(['/', '\\']) {
            return Err(SinkError::InvalidName(file_name.to_string()));
        }

        let mut attempt: u32 = 0;
        loop {
            match self.write_once(file_name, &contents).await {
                Ok(path) => return Ok(path.display().to_string()),
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(error = %e, file_name, attempt, "write failed, retrying with backoff");
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                Err(e) => {
                    return Err(SinkError::Io {
                        file_name: file_name.to_string(),
                        source: e,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_is_renamed_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path().join("NEM12"));

        let location = sink
            .persist("NEM12#2025082700001#X4MDP#Evergy.csv", b"100\r\n900\r\n".to_vec())
            .await
            .unwrap();

        let written = std::fs::read(&location).unwrap();
        assert_eq!(written, b"100\r\n900\r\n");

        let names: Vec<_> = std::fs::read_dir(sink.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, ["NEM12#2025082700001#X4MDP#Evergy.csv"]);
    }

    #[tokio::test]
    async fn existing_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path());

        sink.persist("a.csv", b"old".to_vec()).await.unwrap();
        let location = sink.persist("a.csv", b"new".to_vec()).await.unwrap();

        assert_eq!(std::fs::read(location).unwrap(), b"new");
    }

    #[tokio::test]
    async fn path_separators_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path());

        let err = sink.persist("../escape.csv", Vec::new()).await.unwrap_err();
        assert!(matches!(err, SinkError::InvalidName(_)));
    }

    #[tokio::test]
    async fn unwritable_directory_fails_after_retries() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();
        let sink = DirectorySink::new(&blocker).with_retries(1, Duration::from_millis(1));

        let err = sink.persist("a.csv", b"x".to_vec()).await.unwrap_err();
        assert!(matches!(err, SinkError::Io { .. }));
    }
}
