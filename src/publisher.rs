use crate::codec::h265::{reorder_estimator_factory, H265Parser, ParameterSetCache};
use crate::config::{Config, Target};
use crate::error::Result;
use crate::source::{AccessUnitSource, TimedAccessUnit};
use crate::stream::H265TsMuxer;
use crate::transport::Connection;

/// Sends the access units of `source` to the configured target until the
/// source ends or a fatal error occurs.
///
/// The connection is opened with the first access unit, so the server never
/// holds an idle connection while the source warms up. Buffered output is
/// flushed and the connection shut down on every exit path.
pub async fn publish<S>(source: &mut S, config: &Config) -> Result<()>
where
    S: AccessUnitSource + ?Sized,
{
    let target = config.target()?;
    let mut publisher = Publisher {
        config,
        target,
        muxer: None,
        geometry_logged: false,
        units: 0,
    };

    let result = publisher.pump(source).await;
    let closed = match publisher.muxer.as_mut() {
        Some(muxer) => muxer.close().await,
        None => Ok(()),
    };
    log::info!("published {} access units", publisher.units);
    result.and(closed)
}

struct Publisher<'a> {
    config: &'a Config,
    target: Target,
    muxer: Option<H265TsMuxer<Connection>>,
    geometry_logged: bool,
    units: u64,
}

impl Publisher<'_> {
    async fn pump<S>(&mut self, source: &mut S) -> Result<()>
    where
        S: AccessUnitSource + ?Sized,
    {
        while let Some(au) = source.next_access_unit().await? {
            self.write(au).await?;
        }
        Ok(())
    }

    async fn write(&mut self, au: TimedAccessUnit) -> Result<()> {
        if self.muxer.is_none() {
            let connection = Connection::connect(
                &self.target.addr,
                &self.target.stream_id,
                self.config.passphrase.as_deref(),
            )
            .await?;
            let muxer = H265TsMuxer::new(connection, ParameterSetCache::default())
                .with_policy(self.config.random_access_policy)
                .with_estimator_factory(reorder_estimator_factory(self.config.frame_duration()));
            self.muxer = Some(muxer);
        }
        let Some(muxer) = self.muxer.as_mut() else {
            return Ok(());
        };

        match muxer.write_access_unit(&au.nalus, au.pts, au.wallclock).await {
            Ok(true) => self.units += 1,
            Ok(false) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => log::warn!("dropping access unit at {:?}: {}", au.pts, e),
        }

        if !self.geometry_logged {
            if let Some(sps) = muxer.params().sps.as_ref() {
                self.geometry_logged = true;
                match H265Parser::new().parse_sps(sps) {
                    Ok(info) => log::info!(
                        "video width: {} height: {} reorder: {}",
                        info.width(),
                        info.height(),
                        info.max_num_reorder_pics
                    ),
                    Err(e) => log::warn!("unable to parse SPS: {}", e),
                }
            }
        }
        Ok(())
    }
}
