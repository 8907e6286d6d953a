//! Gateway configuration: command-line flags layered over an optional
//! key=value file named by `ORCHID_CONFIG`, layered over defaults.

use std::env;

use clap::{
    app_from_crate, crate_authors, crate_description, crate_name,
    crate_version, Arg, ArgMatches,
};
use derive_more::{Display, From};
use serde::Deserialize;
use smart_default::SmartDefault;

/// Environment variable naming an additional key=value config file parsed
/// with the same option names as the command line.
pub const CONFIG_ENV: &str = "ORCHID_CONFIG";

/// Failures while assembling the configuration.
#[derive(Debug, Display, From)]
pub enum ConfError {
    /// The `ORCHID_CONFIG` file could not be read or parsed.
    #[display(fmt = "failed to read config file: {}", _0)]
    File(config::ConfigError),

    /// A command-line value did not parse.
    #[display(fmt = "invalid --rendezvous-port: {}", _0)]
    Port(std::num::ParseIntError),
}

/// Everything the gateway is configured by.
#[derive(Clone, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct Conf {
    /// Port the signaling endpoint listens on, on `0.0.0.0`.
    #[default = 8080]
    #[serde(rename = "rendezvous-port")]
    pub rendezvous_port: u16,

    /// STUN URL advertised to every peer connection the gateway spawns.
    #[default("stun:stun.l.google.com:19302".to_owned())]
    #[serde(rename = "ice-stun-server")]
    pub ice_stun_server: String,
}

impl Conf {
    /// Assembles the configuration from the process environment: defaults,
    /// then the `ORCHID_CONFIG` file if set, then explicit command-line
    /// flags. Exits after printing usage when `--help` is given.
    ///
    /// # Errors
    ///
    /// [`ConfError`] when the file or a flag value is malformed.
    pub fn parse() -> Result<Conf, ConfError> {
        let matches = app_from_crate!()
            .arg(
                Arg::with_name("rendezvous-port")
                    .help("port the signaling endpoint listens on")
                    .long("rendezvous-port")
                    .default_value("8080"),
            )
            .arg(
                Arg::with_name("ice-stun-server")
                    .help("STUN server URL advertised to peer connections")
                    .long("ice-stun-server")
                    .default_value("stun:stun.l.google.com:19302"),
            )
            .get_matches();
        let file = env::var(CONFIG_ENV).ok();
        Conf::assemble(&matches, file.as_deref())
    }

    /// Layers `matches` over the key=value file at `file` over defaults.
    fn assemble(
        matches: &ArgMatches<'_>,
        file: Option<&str>,
    ) -> Result<Conf, ConfError> {
        let mut conf = match file {
            Some(path) => Conf::file(path)?,
            None => Conf::default(),
        };
        if matches.occurrences_of("rendezvous-port") > 0 {
            if let Some(port) = matches.value_of("rendezvous-port") {
                conf.rendezvous_port = port.parse()?;
            }
        }
        if matches.occurrences_of("ice-stun-server") > 0 {
            if let Some(url) = matches.value_of("ice-stun-server") {
                conf.ice_stun_server = url.to_owned();
            }
        }
        Ok(conf)
    }

    /// Reads the key=value file at `path`; keys absent from the file keep
    /// their defaults.
    fn file(path: &str) -> Result<Conf, ConfError> {
        let mut layered = config::Config::default();
        let _ = layered
            .merge(config::File::new(path, config::FileFormat::Ini))?;
        Ok(layered.try_into()?)
    }
}
