#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use chrono::{DateTime, TimeZone, Utc};
    use std::io::Cursor;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use tokio::time::{timeout, Duration};
    use tsbridge::codec::annexb_unmarshal;
    use tsbridge::config::Config;
    use tsbridge::error::{BridgeError, Result};
    use tsbridge::format::ts::{side_channel, TSDemuxer, TS_PACKET_SIZE};
    use tsbridge::source::{AccessUnitSource, TimedAccessUnit};
    use tsbridge::transport::Listener;
    use tsbridge::{publisher, server};

    const TEST_SEGMENT_WAIT_TIMEOUT: u64 = 10;
    const T1: i64 = 1_700_000_000_000;
    const T2: i64 = 1_700_000_001_000;

    struct VecSource {
        units: std::vec::IntoIter<TimedAccessUnit>,
    }

    #[async_trait::async_trait]
    impl AccessUnitSource for VecSource {
        async fn next_access_unit(&mut self) -> Result<Option<TimedAccessUnit>> {
            Ok(self.units.next())
        }
    }

    fn nalu(nal_type: u8, payload: u8) -> Bytes {
        Bytes::from(vec![nal_type << 1, 0x01, payload])
    }

    fn time(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    /// Two groups of pictures, 25 fps, each opened by an IDR with in-band
    /// parameter sets, preceded by a picture that cannot start the stream.
    fn source() -> VecSource {
        let mut units = vec![TimedAccessUnit {
            nalus: vec![nalu(1, 0x01)],
            pts: Duration::ZERO,
            wallclock: None,
        }];
        for (i, millis) in [(1u32, T1), (26, T2)] {
            for j in 0..25u32 {
                let frame = i + j;
                let nalus = if j == 0 {
                    vec![nalu(32, 0x0c), nalu(33, 0x01), nalu(34, 0xc1), nalu(19, 0xaf)]
                } else {
                    vec![nalu(1, frame as u8)]
                };
                units.push(TimedAccessUnit {
                    nalus,
                    pts: Duration::from_millis(40) * frame,
                    wallclock: (j == 0).then(|| time(millis)),
                });
            }
        }
        VecSource {
            units: units.into_iter(),
        }
    }

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("tsbridge-{}-{}", name, std::process::id()))
    }

    async fn start_server(output_dir: &Path, passphrase: Option<&str>) -> Config {
        let listener = Listener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = Config {
            target_url: format!("tsb://{}?streamid=publish:test", addr),
            passphrase: passphrase.map(String::from),
            output_dir: output_dir.to_path_buf(),
            frame_rate: 25.0,
            ..Default::default()
        };
        tokio::spawn(server::run(listener, Arc::new(config.clone())));
        config
    }

    async fn list_segments(dir: &Path) -> Vec<(PathBuf, u64)> {
        let mut found = Vec::new();
        if let Ok(mut entries) = tokio::fs::read_dir(dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let len = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
                found.push((entry.path(), len));
            }
        }
        found.sort();
        found
    }

    /// Waits until `count` segments exist and their sizes stopped changing.
    async fn wait_for_segments(dir: &Path, count: usize) -> Vec<PathBuf> {
        timeout(Duration::from_secs(TEST_SEGMENT_WAIT_TIMEOUT), async {
            let mut previous = Vec::new();
            loop {
                let found = list_segments(dir).await;
                if found.len() >= count && found == previous {
                    return found.into_iter().map(|(path, _)| path).collect();
                }
                previous = found;
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await
        .expect("segments were not written in time")
    }

    #[tokio::test]
    async fn test_publish_to_server_writes_segments() {
        let dir = temp_dir("bridge");
        let _ = tokio::fs::remove_dir_all(&dir).await;
        let config = start_server(&dir, Some("secret")).await;

        publisher::publish(&mut source(), &config).await.unwrap();

        let segments = wait_for_segments(&dir, 2).await;
        let names: Vec<_> = segments
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![format!("output-{}.ts", T1), format!("output-{}.ts", T2)]);

        for (path, millis) in segments.iter().zip([T1, T2]) {
            let data = tokio::fs::read(path).await.unwrap();
            assert_eq!(data.len() % TS_PACKET_SIZE, 0);

            let mut demuxer = TSDemuxer::new(Cursor::new(data));
            let first = demuxer.next_data().await.unwrap().unwrap();
            assert!(first.is_random_access());
            let private_data = first.pes.header.private_data.unwrap();
            assert_eq!(side_channel::decode_millis(&private_data), Some(millis));
            assert_eq!(annexb_unmarshal(&first.pes.payload).unwrap().len(), 5);

            let mut units = 1;
            while let Some(unit) = demuxer.next_data().await.unwrap() {
                assert!(!unit.is_random_access());
                assert!(unit.pes.header.private_data.is_none());
                units += 1;
            }
            assert_eq!(units, 25);
        }

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_wrong_passphrase_is_refused() {
        let dir = temp_dir("refused");
        let mut config = start_server(&dir, Some("secret")).await;
        config.passphrase = Some("guess".into());

        let err = publisher::publish(&mut source(), &config).await.unwrap_err();
        assert!(matches!(err, BridgeError::Handshake(_)));
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_empty_source_never_connects() {
        let config = Config {
            // nothing listens here
            target_url: "tsb://127.0.0.1:9?streamid=publish:test".into(),
            ..Default::default()
        };
        let mut source = VecSource {
            units: Vec::new().into_iter(),
        };
        publisher::publish(&mut source, &config).await.unwrap();
    }
}
