//! Legacy `key=value;` connection strings
//!
//! Keys are case-insensitive and accept the aliases ADO-era applications
//! use (`Data Source`, `Initial Catalog`, `UID`, `PWD`, ...). Values may be
//! wrapped in single quotes, double quotes or braces when they contain `;`.
//!
//! ```rust,ignore
//! let opts = ConnectionOptions::parse(
//!     "Provider=SQLOLEDB;Data Source=db1,1444;Initial Catalog=Sales;User ID=app;Password={p;w}",
//! )?;
//! assert_eq!(opts.host, "db1");
//! assert_eq!(opts.port, Some(1444));
//! ```

use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::pool::PoolOptions;
use crate::provider::ProviderKind;

const DEFAULT_HOST: &str = "localhost";

/// Parsed connection target
#[derive(Clone, Default, PartialEq)]
pub struct ConnectionOptions {
    /// Server host (or file path)
    pub host: String,
    /// Explicit port
    pub port: Option<u16>,
    /// Database / catalog
    pub database: Option<String>,
    /// Login
    pub username: Option<String>,
    /// Password
    pub password: Option<String>,
    /// Connect timeout
    pub timeout: Option<Duration>,
    /// Keys not understood by the engine, lowercased
    pub properties: HashMap<String, String>,
}

impl std::fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("timeout", &self.timeout)
            .field("properties", &self.properties)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Key {
    Host,
    Port,
    Database,
    Username,
    Password,
    Timeout,
    /// Provider/Driver: routing is decided by the caller
    Ignored,
    Other,
}

fn classify(key: &str) -> Key {
    match key {
        "server" | "data source" | "host" | "address" | "addr" | "network address" => Key::Host,
        "port" => Key::Port,
        "database" | "initial catalog" | "db" => Key::Database,
        "user id" | "uid" | "user" | "username" | "user name" => Key::Username,
        "password" | "pwd" => Key::Password,
        "connect timeout" | "connection timeout" | "timeout" => Key::Timeout,
        "provider" | "driver" => Key::Ignored,
        _ => Key::Other,
    }
}

/// Lowercase and collapse internal whitespace: `"Initial   Catalog"` → `"initial catalog"`
fn normalize_key(raw: &str) -> String {
    raw.split_whitespace()
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split on `;` outside quotes and braces
fn split_segments(input: &str) -> Result<Vec<String>> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars().peekable();
    let mut closer: Option<char> = None;

    while let Some(c) = chars.next() {
        match closer {
            Some(end) if c == end => {
                // doubled closer is an escaped literal
                if chars.peek() == Some(&end) {
                    current.push(c);
                    current.push(end);
                    chars.next();
                } else {
                    current.push(c);
                    closer = None;
                }
            }
            Some(_) => current.push(c),
            None => match c {
                ';' => segments.push(std::mem::take(&mut current)),
                '\'' | '"' => {
                    closer = Some(c);
                    current.push(c);
                }
                '{' => {
                    closer = Some('}');
                    current.push(c);
                }
                _ => current.push(c),
            },
        }
    }

    if let Some(end) = closer {
        return Err(Error::validation(format!(
            "unterminated value in connection string (missing '{}')",
            end
        )));
    }
    segments.push(current);
    Ok(segments)
}

/// Strip one level of quoting, undoubling escaped closers
fn unquote(raw: &str) -> String {
    let value = raw.trim();
    let mut chars = value.chars();
    let (open, close) = match (chars.next(), chars.next_back()) {
        (Some('{'), Some('}')) => ('{', '}'),
        (Some('\''), Some('\'')) => ('\'', '\''),
        (Some('"'), Some('"')) => ('"', '"'),
        _ => return value.to_string(),
    };
    let inner = &value[open.len_utf8()..value.len() - close.len_utf8()];
    let doubled: String = [close, close].iter().collect();
    inner.replace(&doubled, &close.to_string())
}

/// `host,port` or `host:port`; IPv6 literals and named instances pass through
fn split_host_port(raw: &str) -> Result<(String, Option<u16>)> {
    let split = raw
        .rsplit_once(',')
        .or_else(|| match raw.matches(':').count() {
            1 => raw.split_once(':'),
            _ => None,
        });

    match split {
        Some((host, port)) => {
            let port = port.trim().parse::<u16>().map_err(|_| {
                Error::validation(format!("invalid port '{}' in '{}'", port.trim(), raw))
            })?;
            Ok((host.trim().to_string(), Some(port)))
        }
        None => Ok((raw.to_string(), None)),
    }
}

fn parse_port(raw: &str) -> Result<u16> {
    raw.parse::<u16>()
        .map_err(|_| Error::validation(format!("invalid port '{}'", raw)))
}

impl ConnectionOptions {
    /// Parse a legacy connection string.
    ///
    /// An explicit `Port` key wins over a port embedded in the host. A
    /// missing host means `localhost`.
    pub fn parse(input: &str) -> Result<Self> {
        if input.trim().is_empty() {
            return Err(Error::validation("connection string is empty"));
        }

        let mut opts = Self::default();
        let mut inline_port = None;
        let mut explicit_port = None;

        for segment in split_segments(input)? {
            if segment.trim().is_empty() {
                continue;
            }
            let (raw_key, raw_value) = segment.split_once('=').ok_or_else(|| {
                Error::validation(format!("malformed connection string segment '{}'", segment.trim()))
            })?;

            let key = normalize_key(raw_key);
            if key.is_empty() {
                return Err(Error::validation(format!(
                    "connection string segment '{}' has no key",
                    segment.trim()
                )));
            }
            let value = unquote(raw_value);

            match classify(&key) {
                Key::Host => {
                    let (host, port) = split_host_port(&value)?;
                    opts.host = host;
                    inline_port = port;
                }
                Key::Port => explicit_port = Some(parse_port(&value)?),
                Key::Database => opts.database = Some(value),
                Key::Username => opts.username = Some(value),
                Key::Password => opts.password = Some(value),
                Key::Timeout => {
                    let secs = value.parse::<u64>().map_err(|_| {
                        Error::validation(format!("invalid timeout '{}'", value))
                    })?;
                    opts.timeout = Some(Duration::from_secs(secs));
                }
                Key::Ignored => {}
                Key::Other => {
                    opts.properties.insert(key, value);
                }
            }
        }

        if opts.host.is_empty() {
            opts.host = DEFAULT_HOST.to_string();
        }
        opts.port = explicit_port.or(inline_port);
        Ok(opts)
    }

    /// Pool target for `provider`
    pub fn to_pool_options(&self, provider: ProviderKind) -> PoolOptions {
        let mut options = PoolOptions::new(provider, self.host.clone());
        options.port = self.port;
        options.database = self.database.clone();
        options.username = self.username.clone();
        options.password = self.password.clone();
        options.properties = self.properties.clone();
        options
    }
}

impl std::str::FromStr for ConnectionOptions {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
