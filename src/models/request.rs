use crate::models::value::PortableValue;
use crate::models::zone::ZoneId;
use crate::services::database::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How the rows of each statement are delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FetchMode {
    /// First row of each statement
    FetchOne,
    /// All rows, held in memory
    Fetch,
    /// All rows streamed to a staged file
    Store,
    /// Side effects only
    None,
}

impl FetchMode {
    /// Resolves the task flags in priority order FETCH_ONE > FETCH > STORE > NONE
    pub fn from_flags(fetch_one: bool, fetch: bool, store: bool) -> Self {
        if fetch_one {
            FetchMode::FetchOne
        } else if fetch {
            FetchMode::Fetch
        } else if store {
            FetchMode::Store
        } else {
            FetchMode::None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FetchMode::FetchOne => "FETCH_ONE",
            FetchMode::Fetch => "FETCH",
            FetchMode::Store => "STORE",
            FetchMode::None => "NONE",
        }
    }
}

/// Effective fetch size handed to a driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSize {
    /// Driver default
    Driver,
    Rows(u32),
    /// Fetch everything client-side, regardless of the requested size
    Unbounded,
}

pub type Parameters = BTreeMap<String, PortableValue>;

/// One invocation of the statement runner
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub sql: String,
    pub parameters: Parameters,
    pub fetch_mode: FetchMode,
    pub fetch_size: Option<u32>,
    pub transactional: bool,
    pub auto_commit: Option<bool>,
    pub time_zone: ZoneId,
    pub after_sql: Option<String>,
}

impl QueryRequest {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            parameters: Parameters::new(),
            fetch_mode: FetchMode::None,
            fetch_size: None,
            transactional: true,
            auto_commit: None,
            time_zone: ZoneId::utc(),
            after_sql: None,
        }
    }

    pub fn with_fetch_mode(mut self, fetch_mode: FetchMode) -> Self {
        self.fetch_mode = fetch_mode;
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<PortableValue>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_fetch_size(mut self, fetch_size: u32) -> Self {
        self.fetch_size = Some(fetch_size);
        self
    }

    pub fn with_transactional(mut self, transactional: bool) -> Self {
        self.transactional = transactional;
        self
    }

    pub fn with_auto_commit(mut self, auto_commit: bool) -> Self {
        self.auto_commit = Some(auto_commit);
        self
    }

    pub fn with_time_zone(mut self, time_zone: ZoneId) -> Self {
        self.time_zone = time_zone;
        self
    }

    pub fn with_after_sql(mut self, after_sql: impl Into<String>) -> Self {
        self.after_sql = Some(after_sql.into());
        self
    }
}

/// Where and how to connect. Every field may be a template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Explicit engine; inferred from the URL scheme when absent
    #[serde(default, skip_serializing)]
    pub engine: Option<Engine>,
}

impl ConnectionDescriptor {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_engine(mut self, engine: Engine) -> Self {
        self.engine = Some(engine);
        self
    }
}
