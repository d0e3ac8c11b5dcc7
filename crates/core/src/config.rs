//! Configuration system for the gateways.
//!
//! Config priority: explicit path > `$GATEWAY_CONFIG` > user (~/.config/gateway/config.toml) > defaults

use std::{
  collections::BTreeMap,
  path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
  ConfigError, EntityKind, QueryId,
  domain::queries,
  routing::{self, EofMultiplicity, RoutingTable},
};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "GATEWAY_CONFIG";

// ============================================================================
// Ingestion Configuration
// ============================================================================

/// Ingestion router (input gateway) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
  /// Listener for primary entity batches
  pub movies_address: String,

  /// Listener for credits batches
  pub credits_address: String,

  /// Listener for ratings batches
  pub ratings_address: String,

  /// Listener that hands out fresh client ids (disabled when unset)
  #[serde(skip_serializing_if = "Option::is_none")]
  pub connections_address: Option<String>,

  /// Idle read deadline per producer connection in seconds (default: 300)
  pub read_timeout_secs: u64,

  /// Re-publish attempts for a failed termination message (default: 2)
  /// 0 abandons the rest of the fan-out on the first failure.
  pub fan_out_retries: u32,
}

impl Default for InputConfig {
  fn default() -> Self {
    Self {
      movies_address: "0.0.0.0:12345".to_string(),
      credits_address: "0.0.0.0:12346".to_string(),
      ratings_address: "0.0.0.0:12347".to_string(),
      connections_address: Some("0.0.0.0:12344".to_string()),
      read_timeout_secs: 300,
      fan_out_retries: 2,
    }
  }
}

impl InputConfig {
  /// Listener address for an entity kind
  pub fn address(&self, entity: EntityKind) -> &str {
    match entity {
      EntityKind::Movies => &self.movies_address,
      EntityKind::Credits => &self.credits_address,
      EntityKind::Ratings => &self.ratings_address,
    }
  }
}

// ============================================================================
// Result Delivery Configuration
// ============================================================================

/// Result delivery service (output gateway) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
  /// Listener for client result connections
  pub address: String,

  /// Queue the final worker stages publish results to
  pub results_queue: String,

  /// How long to wait for a client's RESULT_ACK in seconds (default: 30)
  pub ack_timeout_secs: u64,

  /// How long a new connection may take to announce its client id (default: 10)
  pub announce_timeout_secs: u64,

  /// Termination signals expected per query on the results queue.
  /// Queries not listed expect a single signal.
  pub eof_counts: BTreeMap<String, u32>,
}

impl Default for OutputConfig {
  fn default() -> Self {
    Self {
      address: "0.0.0.0:12350".to_string(),
      results_queue: "results".to_string(),
      ack_timeout_secs: 30,
      announce_timeout_secs: 10,
      eof_counts: BTreeMap::new(),
    }
  }
}

// ============================================================================
// Broker Configuration
// ============================================================================

/// In-process queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
  /// Messages buffered per queue before publishers wait (default: 1024)
  pub queue_capacity: usize,
}

impl Default for BrokerConfig {
  fn default() -> Self {
    Self { queue_capacity: 1024 }
  }
}

// ============================================================================
// Daemon Configuration
// ============================================================================

/// Process-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
  /// Log level: "off", "error", "warn", "info", "debug", "trace"
  /// Default: "info"
  #[serde(default = "default_log_level")]
  pub log_level: String,

  /// Log file rotation: "daily", "hourly", "never"
  /// Default: "daily"
  #[serde(default = "default_log_rotation")]
  pub log_rotation: String,

  /// Directory for log files when running in the background
  #[serde(skip_serializing_if = "Option::is_none")]
  pub log_dir: Option<PathBuf>,
}

fn default_log_level() -> String {
  "info".to_string()
}
fn default_log_rotation() -> String {
  "daily".to_string()
}

impl Default for DaemonConfig {
  fn default() -> Self {
    Self {
      log_level: default_log_level(),
      log_rotation: default_log_rotation(),
      log_dir: None,
    }
  }
}

// ============================================================================
// Routes
// ============================================================================

/// One `(query, entity) -> queue` route and its fan-out count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
  pub query: QueryId,
  pub entity: EntityKind,
  pub queue: String,
  /// Worker replicas reading `queue`; each needs its own termination signal
  #[serde(default = "default_eof_count")]
  pub eof_count: u32,
}

fn default_eof_count() -> u32 {
  1
}

fn default_routes() -> Vec<RouteConfig> {
  let mut routes: Vec<RouteConfig> = queries::ALL
    .iter()
    .map(|query| RouteConfig {
      query: QueryId::from(*query),
      entity: EntityKind::Movies,
      queue: format!("filter_{}", query.replace('-', "_")),
      eof_count: 1,
    })
    .collect();

  routes.push(RouteConfig {
    query: QueryId::from(queries::TOP_ARGENTINIAN_ACTORS),
    entity: EntityKind::Credits,
    queue: "join_top_argentinian_actors".to_string(),
    eof_count: 1,
  });
  routes.push(RouteConfig {
    query: QueryId::from(queries::TOP_ARGENTINIAN_MOVIES_BY_RATING),
    entity: EntityKind::Ratings,
    queue: "join_top_argentinian_movies_by_rating".to_string(),
    eof_count: 1,
  });

  routes
}

// ============================================================================
// Main Configuration
// ============================================================================

/// Complete gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub input: InputConfig,

  #[serde(default)]
  pub output: OutputConfig,

  #[serde(default)]
  pub broker: BrokerConfig,

  #[serde(default)]
  pub daemon: DaemonConfig,

  #[serde(default = "default_routes")]
  pub routes: Vec<RouteConfig>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      input: InputConfig::default(),
      output: OutputConfig::default(),
      broker: BrokerConfig::default(),
      daemon: DaemonConfig::default(),
      routes: default_routes(),
    }
  }
}

impl Config {
  /// Parse and validate a config file. Errors are reported, not defaulted.
  pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    config.validate()?;
    Ok(config)
  }

  /// Resolve the config to use.
  ///
  /// An explicit path (argument or `$GATEWAY_CONFIG`) must load cleanly. The
  /// user config is best-effort: if it is missing the defaults apply.
  pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
    if let Some(path) = explicit {
      return Self::from_path(path);
    }

    if let Ok(path) = std::env::var(CONFIG_ENV) {
      return Self::from_path(Path::new(&path));
    }

    if let Some(user_config_path) = Self::user_config_path()
      && user_config_path.exists()
    {
      return Self::from_path(&user_config_path);
    }

    Ok(Self::default())
  }

  /// Get the user-level config path
  pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CONFIG_DIR") {
      return Some(PathBuf::from(path).join("config.toml"));
    }

    if let Ok(path) = std::env::var("XDG_CONFIG_HOME") {
      return Some(PathBuf::from(path).join("gateway").join("config.toml"));
    }

    dirs::config_dir().map(|p: PathBuf| p.join("gateway").join("config.toml"))
  }

  /// Check addresses and build the lookup tables once to surface bad routes early
  pub fn validate(&self) -> Result<(), ConfigError> {
    check_address("input.movies_address", &self.input.movies_address)?;
    check_address("input.credits_address", &self.input.credits_address)?;
    check_address("input.ratings_address", &self.input.ratings_address)?;
    if let Some(ref address) = self.input.connections_address {
      check_address("input.connections_address", address)?;
    }
    check_address("output.address", &self.output.address)?;

    self.tables().map(|_| ())
  }

  /// Build the routing and multiplicity tables
  pub fn tables(&self) -> Result<(RoutingTable, EofMultiplicity), ConfigError> {
    routing::build_tables(self)
  }

  /// Generate a default config file as a string
  pub fn generate_template() -> String {
    let mut routes = String::new();
    for route in default_routes() {
      routes.push_str(&format!(
        "[[routes]]\nquery = \"{}\"\nentity = \"{}\"\nqueue = \"{}\"\neof_count = {}\n\n",
        route.query,
        route.entity.as_str().to_lowercase(),
        route.queue,
        route.eof_count
      ));
    }

    format!(
      r#"# Gateway Configuration
# Pass with --config, set $GATEWAY_CONFIG, or place in ~/.config/gateway/config.toml

# ============================================================================
# Ingestion Router
# ============================================================================

[input]
# One listener per entity kind
movies_address = "0.0.0.0:12345"
credits_address = "0.0.0.0:12346"
ratings_address = "0.0.0.0:12347"

# Listener that assigns client ids to new producers (comment out to disable)
connections_address = "0.0.0.0:12344"

# Close a producer connection after this many idle seconds
read_timeout_secs = 300

# Re-publish attempts per failed termination message during EOF fan-out
# 0 = abandon the remaining fan-out on the first failure
fan_out_retries = 2

# ============================================================================
# Result Delivery
# ============================================================================

[output]
address = "0.0.0.0:12350"
results_queue = "results"

# Seconds to wait for a client's RESULT_ACK before moving on
ack_timeout_secs = 30

# Seconds a new result connection has to announce its client id
announce_timeout_secs = 10

# Termination signals expected per query on the results queue
# (replica count of the last worker stage). Unlisted queries expect 1.
[output.eof_counts]
# "argentinian-spanish-productions" = 3

# ============================================================================
# Queue Broker
# ============================================================================

[broker]
# Messages buffered per queue before publishers wait
queue_capacity = 1024

# ============================================================================
# Daemon
# ============================================================================

[daemon]
# Log level: off, error, warn, info, debug, trace
log_level = "info"

# Log rotation: daily, hourly, never
log_rotation = "daily"

# Log directory for background mode (default: platform data dir)
# log_dir = "/var/log/gateway"

# ============================================================================
# Routes
# ============================================================================
# eof_count = worker replicas reading the queue; each one gets its own EOF.

{routes}"#
    )
  }
}

fn check_address(listener: &'static str, value: &str) -> Result<(), ConfigError> {
  let valid = value
    .rsplit_once(':')
    .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());

  if valid {
    Ok(())
  } else {
    Err(ConfigError::InvalidAddress {
      listener,
      value: value.to_string(),
    })
  }
}
