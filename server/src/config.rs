use std::{
    env,
    fmt::Display,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    str::FromStr,
};

use comms::{DEFAULT_HEADER_LEN, FrameCodec};

use crate::{Result, ServerErr};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 5000;
const DEFAULT_BACKLOG: u32 = 5;
const DEFAULT_FAN_IN: NonZeroUsize = NonZeroUsize::new(2).unwrap();

/// Immutable settings for a coordinator instance.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    host: String,
    port: u16,
    backlog: u32,
    header_len: NonZeroUsize,
    fan_in: NonZeroUsize,
    rounds: NonZeroUsize,
    checkpoint_path: PathBuf,
    initial_weights: Option<PathBuf>,
}

impl ServerConfig {
    /// Creates a new configuration with every optional setting at its default.
    ///
    /// # Args
    /// * `rounds` - The amount of aggregation rounds before stopping.
    /// * `checkpoint_path` - Where the global weights are persisted after every round.
    ///
    /// # Returns
    /// A `ServerConfig` instance.
    pub fn new(rounds: NonZeroUsize, checkpoint_path: impl Into<PathBuf>) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            backlog: DEFAULT_BACKLOG,
            header_len: DEFAULT_HEADER_LEN,
            fan_in: DEFAULT_FAN_IN,
            rounds,
            checkpoint_path: checkpoint_path.into(),
            initial_weights: None,
        }
    }

    /// Reads the configuration from the process environment.
    ///
    /// `ROUNDS` and `CHECKPOINT_PATH` are required, `HOST`, `PORT`, `BACKLOG`,
    /// `HEADER_LEN`, `FAN_IN` and `INITIAL_WEIGHTS` are optional.
    ///
    /// # Returns
    /// The configuration or `ServerErr::Config` if a variable is missing or malformed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env` but reading variables through `lookup`.
    ///
    /// # Args
    /// * `lookup` - Returns the value of a variable, if set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let rounds = parse_var(&lookup, "ROUNDS")?
            .ok_or_else(|| ServerErr::Config("ROUNDS is required".to_string()))?;

        let checkpoint_path = lookup("CHECKPOINT_PATH")
            .ok_or_else(|| ServerErr::Config("CHECKPOINT_PATH is required".to_string()))?;

        let mut config = Self::new(rounds, checkpoint_path);

        if let Some(host) = lookup("HOST") {
            config.host = host;
        }
        if let Some(port) = parse_var(&lookup, "PORT")? {
            config.port = port;
        }
        if let Some(backlog) = parse_var(&lookup, "BACKLOG")? {
            config.backlog = backlog;
        }
        if let Some(header_len) = parse_var(&lookup, "HEADER_LEN")? {
            config.header_len = header_len;
        }
        if let Some(fan_in) = parse_var(&lookup, "FAN_IN")? {
            config.fan_in = fan_in;
        }

        config.initial_weights = lookup("INITIAL_WEIGHTS").map(PathBuf::from);
        Ok(config)
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn with_header_len(mut self, header_len: NonZeroUsize) -> Self {
        self.header_len = header_len;
        self
    }

    pub fn with_fan_in(mut self, fan_in: NonZeroUsize) -> Self {
        self.fan_in = fan_in;
        self
    }

    pub fn with_initial_weights(mut self, path: impl Into<PathBuf>) -> Self {
        self.initial_weights = Some(path.into());
        self
    }

    /// Returns the `host:port` pair to listen on.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn backlog(&self) -> u32 {
        self.backlog
    }

    /// Returns the codec matching the configured header width.
    pub fn codec(&self) -> FrameCodec {
        FrameCodec::new(self.header_len)
    }

    /// Returns the amount of distinct contributions that complete a round.
    pub fn fan_in(&self) -> NonZeroUsize {
        self.fan_in
    }

    /// Returns the amount of rounds after which training stops.
    pub fn rounds(&self) -> NonZeroUsize {
        self.rounds
    }

    pub fn checkpoint_path(&self) -> &Path {
        &self.checkpoint_path
    }

    /// Returns the checkpoint to start from, the regular checkpoint path if none was given.
    pub fn initial_weights(&self) -> &Path {
        self.initial_weights
            .as_deref()
            .unwrap_or(self.checkpoint_path.as_path())
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| ServerErr::Config(format!("{key}={raw:?}: {e}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup<'a>(vars: &'a HashMap<&str, &str>) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| vars.get(key).map(|v| v.to_string())
    }

    #[test]
    fn defaults_follow_the_protocol() {
        let vars = HashMap::from([("ROUNDS", "3"), ("CHECKPOINT_PATH", "/tmp/w.safetensors")]);
        let config = ServerConfig::from_lookup(lookup(&vars)).unwrap();

        assert_eq!(config.addr(), "127.0.0.1:5000");
        assert_eq!(config.backlog(), 5);
        assert_eq!(config.codec().header_len(), 10);
        assert_eq!(config.fan_in().get(), 2);
        assert_eq!(config.rounds().get(), 3);
        assert_eq!(config.initial_weights(), Path::new("/tmp/w.safetensors"));
    }

    #[test]
    fn overrides_every_optional_setting() {
        let vars = HashMap::from([
            ("ROUNDS", "1"),
            ("CHECKPOINT_PATH", "ckpt"),
            ("HOST", "0.0.0.0"),
            ("PORT", "6000"),
            ("BACKLOG", "64"),
            ("HEADER_LEN", "12"),
            ("FAN_IN", "4"),
            ("INITIAL_WEIGHTS", "init"),
        ]);
        let config = ServerConfig::from_lookup(lookup(&vars)).unwrap();

        assert_eq!(config.addr(), "0.0.0.0:6000");
        assert_eq!(config.backlog(), 64);
        assert_eq!(config.codec().header_len(), 12);
        assert_eq!(config.fan_in().get(), 4);
        assert_eq!(config.initial_weights(), Path::new("init"));
    }

    #[test]
    fn missing_or_malformed_values_are_rejected() {
        let missing = HashMap::from([("CHECKPOINT_PATH", "ckpt")]);
        assert!(matches!(
            ServerConfig::from_lookup(lookup(&missing)),
            Err(ServerErr::Config(_))
        ));

        let zero_rounds = HashMap::from([("ROUNDS", "0"), ("CHECKPOINT_PATH", "ckpt")]);
        assert!(matches!(
            ServerConfig::from_lookup(lookup(&zero_rounds)),
            Err(ServerErr::Config(_))
        ));

        let bad_port = HashMap::from([
            ("ROUNDS", "2"),
            ("CHECKPOINT_PATH", "ckpt"),
            ("PORT", "http"),
        ]);
        assert!(matches!(
            ServerConfig::from_lookup(lookup(&bad_port)),
            Err(ServerErr::Config(_))
        ));
    }
}
