use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

// ============================================================================
// Entity kinds
// ============================================================================

/// Category of source record. Each kind is ingested on its own listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
  /// Primary entity; a single batch may feed several queries at once
  Movies,
  Credits,
  Ratings,
}

impl EntityKind {
  pub const ALL: [EntityKind; 3] = [EntityKind::Movies, EntityKind::Credits, EntityKind::Ratings];

  /// Upper-case name used in headers, acknowledgements and queue metadata
  pub fn as_str(&self) -> &'static str {
    match self {
      EntityKind::Movies => "MOVIES",
      EntityKind::Credits => "CREDITS",
      EntityKind::Ratings => "RATINGS",
    }
  }

  pub fn is_primary(&self) -> bool {
    matches!(self, EntityKind::Movies)
  }

  /// Termination tag stamped on fan-out messages.
  ///
  /// Secondary entities feed joins, whose workers must tell the two input
  /// sides apart, so they carry their own tag.
  pub fn eof_tag(&self) -> &'static str {
    match self {
      EntityKind::Movies => "EOF",
      EntityKind::Credits => "EOF_CREDITS",
      EntityKind::Ratings => "EOF_RATINGS",
    }
  }
}

impl fmt::Display for EntityKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for EntityKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "movies" => Ok(EntityKind::Movies),
      "credits" => Ok(EntityKind::Credits),
      "ratings" => Ok(EntityKind::Ratings),
      other => Err(format!("Invalid entity kind: {}", other)),
    }
  }
}

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! string_id {
  ($(#[$meta:meta])* $name:ident) => {
    $(#[$meta])*
    #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct $name(String);

    impl $name {
      pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
      }

      pub fn as_str(&self) -> &str {
        &self.0
      }
    }

    impl fmt::Display for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
      }
    }

    impl From<String> for $name {
      fn from(s: String) -> Self {
        Self(s)
      }
    }

    impl From<&str> for $name {
      fn from(s: &str) -> Self {
        Self(s.to_string())
      }
    }

    impl AsRef<str> for $name {
      fn as_ref(&self) -> &str {
        &self.0
      }
    }
  };
}

string_id!(
  /// Identifier of one analytical query running over the ingested data
  QueryId
);

string_id!(
  /// Opaque identifier of a producer session
  ClientId
);

/// Query identifiers known to the default configuration.
pub mod queries {
  pub const ARGENTINIAN_SPANISH_PRODUCTIONS: &str = "argentinian-spanish-productions";
  pub const TOP_INVESTING_COUNTRIES: &str = "top-investing-countries";
  pub const TOP_ARGENTINIAN_MOVIES_BY_RATING: &str = "top-argentinian-movies-by-rating";
  pub const TOP_ARGENTINIAN_ACTORS: &str = "top-argentinian-actors";
  pub const SENTIMENT_ANALYSIS: &str = "sentiment-analysis";

  pub const ALL: &[&str] = &[
    ARGENTINIAN_SPANISH_PRODUCTIONS,
    TOP_INVESTING_COUNTRIES,
    TOP_ARGENTINIAN_MOVIES_BY_RATING,
    TOP_ARGENTINIAN_ACTORS,
    SENTIMENT_ANALYSIS,
  ];
}
