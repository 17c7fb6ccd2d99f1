use std::{str::FromStr, time::Duration};

use tracing::warn;

use super::{ClientOptions, ServerAddress};
use crate::{
    error::{Error, Result},
    selection_criteria::ReadPreference,
    trace::TOPOLOGY_TRACING_EVENT_TARGET,
};

const DEFAULT_SCHEME: &str = "mongodb://";
const ILLEGAL_DATABASE_CHARACTERS: &[char] = &['/', '\\', ' ', '"', '$', '.'];

/// Splits a string into a section before a given index and a section exclusively after the index.
/// Empty portions are returned as `None`.
fn exclusive_split_at(s: &str, i: usize) -> (Option<&str>, Option<&str>) {
    let (l, r) = s.split_at(i);

    let lout = if !l.is_empty() { Some(l) } else { None };
    let rout = if r.len() > 1 { Some(&r[1..]) } else { None };

    (lout, rout)
}

fn percent_decode(s: &str, err_message: &str) -> Result<String> {
    match percent_encoding::percent_decode_str(s).decode_utf8() {
        Ok(result) => Ok(result.to_string()),
        Err(_) => Err(Error::invalid_argument(err_message)),
    }
}

pub(super) fn parse_connection_string(s: &str) -> Result<ClientOptions> {
    let s = s.trim();
    let normalized;
    let s = if s.contains("://") {
        s
    } else {
        normalized = format!("{DEFAULT_SCHEME}{s}");
        normalized.as_str()
    };

    let mut parser = ClientOptionsParser::default();
    parser.parse(s)?;
    Ok(parser.options)
}

#[derive(Debug, Default)]
struct ClientOptionsParser {
    options: ClientOptions,
}

impl ClientOptionsParser {
    fn parse(&mut self, s: &str) -> Result<()> {
        let end_of_scheme = s
            .find("://")
            .ok_or_else(|| Error::invalid_argument("connection string contains no scheme"))?;

        match &s[..end_of_scheme] {
            "mongodb" => {}
            other => {
                return Err(Error::invalid_argument(format!(
                    "invalid connection string scheme: {other}"
                )))
            }
        };

        let after_scheme = &s[end_of_scheme + 3..];

        let (hosts_section, post_slash) = match after_scheme.find('/') {
            Some(slash_index) => exclusive_split_at(after_scheme, slash_index),
            None => {
                if after_scheme.contains('?') {
                    return Err(Error::invalid_argument(
                        "Missing delimiting slash between hosts and options",
                    ));
                }
                ((!after_scheme.is_empty()).then_some(after_scheme), None)
            }
        };

        let (database, options_section) = match post_slash {
            Some(section) => match section.find('?') {
                Some(index) => exclusive_split_at(section, index),
                None => (post_slash, None),
            },
            None => (None, None),
        };

        if let Some(hosts_section) = hosts_section {
            if hosts_section.contains('@') {
                return Err(Error::invalid_argument(
                    "credentials in the connection string are not supported",
                ));
            }

            self.options.hosts = hosts_section
                .split(',')
                .map(|host| {
                    let host = percent_decode(host, "host must be URL encoded")?;
                    ServerAddress::parse(host)
                })
                .collect::<Result<Vec<_>>>()?;
        }

        self.options.default_database = match database {
            Some(db) => {
                let decoded = percent_decode(db, "database name must be URL encoded")?;
                if decoded
                    .chars()
                    .any(|c| ILLEGAL_DATABASE_CHARACTERS.contains(&c))
                {
                    return Err(Error::invalid_argument("illegal character in database name"));
                }
                Some(decoded)
            }
            None => None,
        };

        if let Some(options_section) = options_section {
            self.parse_options(options_section)?;
        }

        Ok(())
    }

    fn parse_options(&mut self, options: &str) -> Result<()> {
        let mut keys: Vec<String> = Vec::new();

        for option_pair in options.split('&').filter(|pair| !pair.is_empty()) {
            let (key, value) = option_pair.split_once('=').ok_or_else(|| {
                Error::invalid_argument(format!(
                    "connection string options is not a `key=value` pair: {option_pair}"
                ))
            })?;

            let key = key.to_lowercase();
            if keys.contains(&key) {
                return Err(Error::invalid_argument(
                    "repeated options are not allowed in the connection string",
                ));
            }

            let value = percent_encoding::percent_decode(value.as_bytes()).decode_utf8_lossy();
            self.parse_option_pair(&key, value.as_ref())?;
            keys.push(key);
        }

        Ok(())
    }

    fn parse_option_pair(&mut self, key: &str, value: &str) -> Result<()> {
        macro_rules! get_bool {
            ($value:expr, $option:expr) => {
                match $value.to_lowercase().as_str() {
                    "true" => true,
                    "false" => false,
                    _ => {
                        return Err(Error::invalid_argument(format!(
                            "connection string `{}` option must be a boolean",
                            $option,
                        )))
                    }
                }
            };
        }

        macro_rules! get_duration {
            ($value:expr, $option:expr) => {
                match u64::from_str($value) {
                    Ok(i) => Duration::from_millis(i),
                    _ => {
                        return Err(Error::invalid_argument(format!(
                            "connection string `{}` option must be a non-negative integer",
                            $option
                        )))
                    }
                }
            };
        }

        macro_rules! get_u32 {
            ($value:expr, $option:expr) => {
                match u32::from_str($value) {
                    Ok(u) => u,
                    Err(_) => {
                        return Err(Error::invalid_argument(format!(
                            "connection string `{}` argument must be a positive integer",
                            $option,
                        )))
                    }
                }
            };
        }

        match key {
            k @ ("poolsize" | "maxpoolsize") => {
                let pool_size = get_u32!(value, k);
                if pool_size == 0 {
                    return Err(Error::invalid_argument(format!(
                        "connection string `{k}` argument must be a positive integer"
                    )));
                }
                self.options.pool_size = Some(pool_size);
            }
            "readpreference" => {
                self.options.read_preference = Some(ReadPreference::from_str(value)?);
            }
            k @ "connecttimeoutms" => {
                self.options.connect_timeout = Some(get_duration!(value, k));
            }
            k @ "sockettimeoutms" => {
                let timeout = get_duration!(value, k);
                self.options.socket_timeout = (!timeout.is_zero()).then_some(timeout);
            }
            k @ "heartbeatfrequencyms" => {
                let heartbeat_freq = get_duration!(value, k);
                if heartbeat_freq.is_zero() {
                    return Err(Error::invalid_argument(format!(
                        "connection string `{k}` argument must be greater than zero"
                    )));
                }
                self.options.heartbeat_freq = Some(heartbeat_freq);
            }
            k @ "reconnectdelayms" => {
                self.options.reconnect_delay = Some(get_duration!(value, k));
            }
            k @ "reconnectretries" => {
                self.options.reconnect_attempts = Some(get_u32!(value, k));
            }
            k @ "directconnection" => {
                self.options.direct_connection = Some(get_bool!(value, k));
            }
            "replicaset" => {
                if value.is_empty() {
                    return Err(Error::invalid_argument(
                        "connection string `replicaSet` option must not be empty",
                    ));
                }
                self.options.repl_set_name = Some(value.to_string());
            }
            other => {
                warn!(
                    target: TOPOLOGY_TRACING_EVENT_TARGET,
                    option = other,
                    "ignoring unsupported connection string option"
                );
            }
        }

        Ok(())
    }
}
