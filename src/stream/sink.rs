use crate::error::Result;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::fs::File;
use tokio::io::AsyncWrite;

/// Output of one segment.
pub type SegmentSink = Box<dyn AsyncWrite + Unpin + Send>;

/// File name of the segment opened at `millis` since the Unix epoch.
pub fn segment_name(millis: i64) -> String {
    format!("output-{}.ts", millis)
}

/// Creates the output of every new segment.
#[async_trait::async_trait]
pub trait SegmentSinkFactory: Send {
    async fn create(&mut self, name: &str) -> Result<SegmentSink>;
}

/// Writes segments as files in a directory.
#[derive(Debug, Clone)]
pub struct FileSinkFactory {
    output_dir: PathBuf,
}

impl FileSinkFactory {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

#[async_trait::async_trait]
impl SegmentSinkFactory for FileSinkFactory {
    async fn create(&mut self, name: &str) -> Result<SegmentSink> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let path = self.output_dir.join(name);
        let file = File::create(&path).await?;
        log::info!("writing segment {}", path.display());
        Ok(Box::new(file))
    }
}

/// Segment lifecycle notifications recorded by [`MemorySinkFactory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Created(String),
    Flushed(String),
    Closed(String),
}

#[derive(Debug, Default)]
struct MemoryState {
    segments: Vec<(String, Vec<u8>)>,
    events: Vec<SinkEvent>,
}

/// Keeps segments in memory. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemorySinkFactory {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names and contents of all segments created so far.
    pub fn segments(&self) -> Vec<(String, Vec<u8>)> {
        self.state
            .lock()
            .map(|state| state.segments.clone())
            .unwrap_or_default()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.state
            .lock()
            .map(|state| state.events.clone())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl SegmentSinkFactory for MemorySinkFactory {
    async fn create(&mut self, name: &str) -> Result<SegmentSink> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "segment storage poisoned"))?;
        let index = state.segments.len();
        state.segments.push((name.to_string(), Vec::new()));
        state.events.push(SinkEvent::Created(name.to_string()));
        Ok(Box::new(MemorySink {
            state: self.state.clone(),
            index,
        }))
    }
}

struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
    index: usize,
}

impl MemorySink {
    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> io::Result<T> {
        self.state
            .lock()
            .map(|mut state| f(&mut state))
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "segment storage poisoned"))
    }

    fn record(&self, event: fn(String) -> SinkEvent) -> io::Result<()> {
        let index = self.index;
        self.with_state(|state| {
            let name = state.segments[index].0.clone();
            state.events.push(event(name));
        })
    }
}

impl AsyncWrite for MemorySink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let index = self.index;
        Poll::Ready(
            self.with_state(|state| state.segments[index].1.extend_from_slice(buf))
                .map(|_| buf.len()),
        )
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(self.record(SinkEvent::Flushed))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(self.record(SinkEvent::Closed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_segment_name() {
        assert_eq!(segment_name(1_700_000_000_000), "output-1700000000000.ts");
    }

    #[tokio::test]
    async fn test_memory_sink_records_lifecycle() {
        let mut factory = MemorySinkFactory::new();
        let mut sink = factory.create("a.ts").await.unwrap();
        sink.write_all(&[1, 2, 3]).await.unwrap();
        sink.shutdown().await.unwrap();

        assert_eq!(factory.segments(), vec![("a.ts".to_string(), vec![1, 2, 3])]);
        assert_eq!(
            factory.events(),
            vec![
                SinkEvent::Created("a.ts".into()),
                SinkEvent::Closed("a.ts".into())
            ]
        );
    }

    #[tokio::test]
    async fn test_file_sink_creates_directory() {
        let dir = std::env::temp_dir().join(format!("tsbridge-sink-{}", std::process::id()));
        let mut factory = FileSinkFactory::new(&dir);
        let mut sink = factory.create(&segment_name(1)).await.unwrap();
        sink.write_all(&[0x47]).await.unwrap();
        sink.shutdown().await.unwrap();

        let written = tokio::fs::read(dir.join("output-1.ts")).await.unwrap();
        assert_eq!(written, vec![0x47]);
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
