use crate::codec::h265::dts::DEFAULT_FRAME_TICKS;
use crate::codec::h265::RandomAccessPolicy;
use crate::error::{BridgeError, Result};
use crate::format::ts::PTS_HZ;
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use std::env::{self, VarError};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

const TSBRIDGE_LISTEN_ADDR: &str = "TSBRIDGE_LISTEN_ADDR";
const TSBRIDGE_TARGET_URL: &str = "TSBRIDGE_TARGET_URL";
const TSBRIDGE_PASSPHRASE: &str = "TSBRIDGE_PASSPHRASE";
const TSBRIDGE_OUTPUT_DIR: &str = "TSBRIDGE_OUTPUT_DIR";
const TSBRIDGE_RANDOM_ACCESS_POLICY: &str = "TSBRIDGE_RANDOM_ACCESS_POLICY";
const TSBRIDGE_FRAME_RATE: &str = "TSBRIDGE_FRAME_RATE";
const TSBRIDGE_HANDSHAKE_TIMEOUT: &str = "TSBRIDGE_HANDSHAKE_TIMEOUT_SECS";

const DEFAULT_CONFIG_FILE_PATH: &str = "./tsbridge.toml";
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:6000";
pub const DEFAULT_TARGET_URL: &str = "tsb://127.0.0.1:6000?streamid=publish:target";
pub const TARGET_SCHEME: &str = "tsb";

/// Settings shared by the server and the publisher.
///
/// Values come from, in increasing precedence: defaults, the TOML file,
/// `TSBRIDGE_*` environment variables and command line flags.
#[derive(Debug, Clone, Args, Deserialize)]
#[serde(default, rename_all = "snake_case", deny_unknown_fields)]
pub struct Config {
    /// Address the server listens on.
    #[clap(long, env = TSBRIDGE_LISTEN_ADDR, default_value = DEFAULT_LISTEN_ADDR)]
    pub listen_addr: String,

    /// Where the publisher sends its stream, as
    /// `tsb://host:port?streamid=publish:<name>`.
    #[clap(long, env = TSBRIDGE_TARGET_URL, default_value = DEFAULT_TARGET_URL)]
    pub target_url: String,

    /// Shared secret checked during the connection handshake.
    #[clap(long, env = TSBRIDGE_PASSPHRASE)]
    pub passphrase: Option<String>,

    /// Directory receiving the segment files.
    #[clap(long, env = TSBRIDGE_OUTPUT_DIR, default_value = ".")]
    pub output_dir: PathBuf,

    /// Which intra pictures start the stream and a new segment: `strict`
    /// (IDR only) or `permissive` (IDR, CRA and BLA).
    #[clap(long, env = TSBRIDGE_RANDOM_ACCESS_POLICY, default_value = "strict")]
    pub random_access_policy: RandomAccessPolicy,

    /// Frame rate of Annex-B file input. The decode timestamp estimator
    /// starts from it until it has measured the stream's own cadence.
    #[clap(long, env = TSBRIDGE_FRAME_RATE, default_value_t = 30.0)]
    pub frame_rate: f64,

    #[clap(long, env = TSBRIDGE_HANDSHAKE_TIMEOUT, default_value_t = 5)]
    pub handshake_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            target_url: DEFAULT_TARGET_URL.to_string(),
            passphrase: None,
            output_dir: PathBuf::from("."),
            random_access_policy: RandomAccessPolicy::default(),
            frame_rate: 30.0,
            handshake_timeout_secs: 5,
        }
    }
}

/// Address and stream id parsed from [`Config::target_url`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub addr: String,
    pub stream_id: String,
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| BridgeError::Config(e.to_string()))
    }

    /// Duration of one frame in 90 kHz ticks.
    pub fn frame_duration(&self) -> i64 {
        if self.frame_rate.is_finite() && self.frame_rate > 0.0 {
            (PTS_HZ as f64 / self.frame_rate).round() as i64
        } else {
            DEFAULT_FRAME_TICKS
        }
    }

    pub fn frame_interval(&self) -> Duration {
        if self.frame_rate.is_finite() && self.frame_rate > 0.0 {
            Duration::from_secs_f64(1.0 / self.frame_rate)
        } else {
            Duration::from_millis(1000 * DEFAULT_FRAME_TICKS as u64 / PTS_HZ)
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn target(&self) -> Result<Target> {
        let url = Url::parse(&self.target_url)
            .map_err(|e| BridgeError::Config(format!("invalid target url: {}", e)))?;
        if url.scheme() != TARGET_SCHEME {
            return Err(BridgeError::Config(format!(
                "unsupported target scheme '{}'",
                url.scheme()
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| BridgeError::Config("target url has no host".into()))?;
        let port = url
            .port()
            .ok_or_else(|| BridgeError::Config("target url has no port".into()))?;
        let stream_id = url
            .query_pairs()
            .find(|(key, _)| key == "streamid")
            .map(|(_, value)| value.into_owned())
            .ok_or_else(|| BridgeError::Config("target url has no streamid".into()))?;

        Ok(Target {
            addr: format!("{}:{}", host, port),
            stream_id,
        })
    }

    fn export_to_env(self) {
        let Config {
            listen_addr,
            target_url,
            passphrase,
            output_dir,
            random_access_policy,
            frame_rate,
            handshake_timeout_secs,
        } = self;

        export_to_env_if_not_present(TSBRIDGE_LISTEN_ADDR, listen_addr);
        export_to_env_if_not_present(TSBRIDGE_TARGET_URL, target_url);
        if let Some(passphrase) = passphrase {
            export_to_env_if_not_present(TSBRIDGE_PASSPHRASE, passphrase);
        }
        export_to_env_if_not_present(TSBRIDGE_OUTPUT_DIR, output_dir);
        let policy = match random_access_policy {
            RandomAccessPolicy::Strict => "strict",
            RandomAccessPolicy::Permissive => "permissive",
        };
        export_to_env_if_not_present(TSBRIDGE_RANDOM_ACCESS_POLICY, policy);
        export_to_env_if_not_present(TSBRIDGE_FRAME_RATE, frame_rate.to_string());
        export_to_env_if_not_present(
            TSBRIDGE_HANDSHAKE_TIMEOUT,
            handshake_timeout_secs.to_string(),
        );
    }
}

pub fn export_to_env_if_not_present<T>(key: &str, value: T)
where
    T: AsRef<OsStr>,
{
    if let Err(VarError::NotPresent) = env::var(key) {
        env::set_var(key, value);
    }
}

/// Bridges real-time H.265 streams into segmented MPEG-TS.
#[derive(Debug, Parser)]
#[clap(version)]
pub struct Cli {
    /// TOML configuration file, `./tsbridge.toml` when present.
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    #[clap(flatten)]
    pub settings: Config,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Accept published streams and write them as segment files.
    Serve,
    /// Send a stream to a server.
    Publish {
        /// Receive RTP/H.265 on this UDP port, RTCP on the next one.
        #[clap(long, conflicts_with = "file", required_unless_present = "file")]
        rtp: Option<u16>,
        /// Read an Annex-B H.265 file.
        #[clap(long)]
        file: Option<PathBuf>,
    },
}

impl Cli {
    /// Parses the command line, layering in the configuration file.
    ///
    /// Values of the file are exported as environment variables that are not
    /// set yet, then the command line is parsed again, so flags override
    /// the environment which overrides the file.
    pub fn try_build() -> Result<(Self, Option<PathBuf>)> {
        let cli = Cli::parse();
        let user_specified = cli.config.clone();
        let path = user_specified
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE_PATH));

        match std::fs::read_to_string(&path) {
            Ok(content) => {
                Config::from_toml_str(&content)?.export_to_env();
                Ok((Cli::parse(), Some(path)))
            }
            Err(e) => match user_specified {
                Some(path) => Err(BridgeError::Config(format!(
                    "unable to read configuration file {}: {}",
                    path.display(),
                    e
                ))),
                None => Ok((cli, None)),
            },
        }
    }
}
