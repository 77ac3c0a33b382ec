use chrono::{DateTime, Datelike, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sqlx::FromRow;
use std::fmt;

use crate::database::optimistic::Versioned;
use crate::validator::{self, Validator};

/// Running time in minutes, rendered as `"<n> mins"` on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Runtime(pub i32);

impl Runtime {
    pub fn minutes(self) -> i32 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} mins", self.0)
    }
}

impl Serialize for Runtime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Runtime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Minutes(i32),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Minutes(minutes) => Ok(Runtime(minutes)),
            Repr::Text(text) => text
                .strip_suffix(" mins")
                .and_then(|n| n.parse::<i32>().ok())
                .map(Runtime)
                .ok_or_else(|| de::Error::custom("invalid runtime format")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Movie {
    pub id: i64,
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
    pub title: String,
    #[serde(skip_serializing_if = "is_zero_year")]
    pub year: i32,
    #[serde(skip_serializing_if = "Runtime::is_zero")]
    pub runtime: Runtime,
    pub genres: Vec<String>,
    pub version: i32,
}

fn is_zero_year(year: &i32) -> bool {
    *year == 0
}

impl Movie {
    pub fn new(title: String, year: i32, runtime: Runtime, genres: Vec<String>) -> Self {
        Self {
            id: 0,
            created_at: Utc::now(),
            title,
            year,
            runtime,
            genres,
            version: 0,
        }
    }

    pub fn validate(&self, v: &mut Validator) {
        v.check(!self.title.is_empty(), "title", "must be provided");
        v.check(self.title.len() <= 500, "title", "must not be more than 500 bytes long");

        v.check(self.year != 0, "year", "must be provided");
        v.check(self.year >= 1888, "year", "must be greater than 1888");
        v.check(self.year <= Utc::now().year(), "year", "must not be in the future");

        v.check(self.runtime.0 != 0, "runtime", "must be provided");
        v.check(self.runtime.0 > 0, "runtime", "must be a positive integer");

        v.check(!self.genres.is_empty(), "genres", "must contain at least 1 genre");
        v.check(self.genres.len() <= 5, "genres", "must not contain more than 5 genres");
        v.check(validator::unique(&self.genres), "genres", "must not contain duplicate values");
    }
}

impl Versioned for Movie {
    fn id(&self) -> i64 {
        self.id
    }

    fn version(&self) -> i32 {
        self.version
    }

    fn set_version(&mut self, version: i32) {
        self.version = version;
    }
}

/// Column layout of the `movies` table.
#[derive(Debug, FromRow)]
pub struct MovieRow {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub year: i32,
    pub runtime: i32,
    pub genres: Vec<String>,
    pub version: i32,
}

impl From<MovieRow> for Movie {
    fn from(row: MovieRow) -> Self {
        Self {
            id: row.id,
            created_at: row.created_at,
            title: row.title,
            year: row.year,
            runtime: Runtime(row.runtime),
            genres: row.genres,
            version: row.version,
        }
    }
}
