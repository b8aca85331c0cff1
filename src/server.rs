use crate::config::Config;
use crate::error::{BridgeError, Result};
use crate::format::ts::{TSDemuxer, TS_CHUNK_SIZE};
use crate::stream::{FileSinkFactory, Segmenter};
use crate::transport::{Listener, PendingConnection};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Binds the configured address and serves connections until the process
/// ends.
pub async fn serve(config: Arc<Config>) -> Result<()> {
    let listener = Listener::bind(&config.listen_addr).await?;
    log::info!(
        "listening on {}, writing segments to {}",
        listener.local_addr()?,
        config.output_dir.display()
    );
    run(listener, config).await
}

/// Accept loop. Every connection is handled on its own task; a failing
/// connection never stops the loop.
pub async fn run(listener: Listener, config: Arc<Config>) -> Result<()> {
    let mut client_id: u64 = 0;
    loop {
        let pending = match listener.accept().await {
            Ok(pending) => pending,
            Err(e) => {
                log::error!("accept failed: {}", e);
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                continue;
            }
        };

        client_id += 1;
        let id = client_id;
        log::info!("new client connection: {}, ({})", id, pending.peer_addr());

        let config = config.clone();
        tokio::spawn(async move {
            match handle_connection(pending, &config).await {
                Ok(segments) => log::info!("client {} finished after {} segments", id, segments),
                Err(e) => log::error!("client {}: {}", id, e),
            }
        });
    }
}

/// Runs the handshake, then segments the connection's transport stream into
/// files. Returns the number of segments written.
pub async fn handle_connection(pending: PendingConnection, config: &Config) -> Result<usize> {
    let connection = tokio::time::timeout(
        config.handshake_timeout(),
        pending.handshake(config.passphrase.as_deref()),
    )
    .await
    .map_err(|_| BridgeError::Handshake("timed out".into()))??;

    let mut demuxer = TSDemuxer::new(BufReader::with_capacity(TS_CHUNK_SIZE, connection));
    let mut segmenter = Segmenter::new(FileSinkFactory::new(&config.output_dir))
        .with_policy(config.random_access_policy)
        .with_frame_duration(config.frame_duration());
    let result = segmenter.run(&mut demuxer).await;
    result.map(|_| segmenter.segment_count())
}
