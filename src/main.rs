use std::sync::Arc;
use tsbridge::config::{Cli, Command};
use tsbridge::source::{AnnexBFileSource, RtpSource};
use tsbridge::{publisher, server, BridgeError};

fn setup_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

#[tokio::main]
async fn main() -> tsbridge::Result<()> {
    setup_logging();

    let (cli, config_read_from) = Cli::try_build()?;
    if let Some(path) = config_read_from {
        log::info!("configuration read from {}", path.display());
    }
    let config = cli.settings;

    match cli.command {
        Command::Serve => server::serve(Arc::new(config)).await,
        Command::Publish {
            rtp: Some(port), ..
        } => {
            let mut source = RtpSource::bind("0.0.0.0", port).await?;
            publisher::publish(&mut source, &config).await
        }
        Command::Publish {
            file: Some(path), ..
        } => {
            let mut source = AnnexBFileSource::open(&path, config.frame_interval())
                .await?
                .with_realtime(true);
            publisher::publish(&mut source, &config).await
        }
        Command::Publish { .. } => Err(BridgeError::Config(
            "publish needs --rtp <port> or --file <path>".into(),
        )),
    }
}
