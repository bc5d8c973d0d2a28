//! Command Shell
//!
//! Line-oriented commands for driving an engine by hand. Each line parses to
//! a `Command`; executing it yields the operation's payload as JSON.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::cache::Cache;
use crate::error::CacheResult;

/// Usage text printed by the binary
pub const USAGE: &str = "\
commands:
  get <key>                 getobj <key>
  set <key> <json> [ttl]    setobj <key> <json> [ttl]
  del <key>                 mget <key> [key...]
  incr <key> [by]           decr <key> [by]
  touch <key> <seconds>     lock <key> [ttl]
  unlock <key>              flush
  quit";

// == Command ==
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Get(String),
    GetObject(String),
    Set {
        key: String,
        value: Value,
        ttl: Option<u64>,
    },
    SetObject {
        key: String,
        value: Value,
        ttl: Option<u64>,
    },
    Del(String),
    MultiGet(Vec<String>),
    Increment {
        key: String,
        by_value: Option<i64>,
    },
    Decrement {
        key: String,
        by_value: Option<i64>,
    },
    Touch {
        key: String,
        lifetime: i64,
    },
    Lock {
        key: String,
        ttl: Option<u64>,
    },
    Unlock(String),
    Flush,
    Quit,
}

/// Why a line could not be turned into a command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty command")]
    Empty,

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("{command}: missing {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },

    #[error("{command}: not a number: {value}")]
    InvalidNumber { command: &'static str, value: String },
}

impl Command {
    // == Parse ==
    /// Parses one input line.
    ///
    /// Values are read as JSON; text that is not valid JSON is taken as a
    /// string. A trailing integer after a `set` value is read as the TTL.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let mut tokens = line.split_whitespace();
        let name = tokens.next().ok_or(ParseError::Empty)?.to_lowercase();
        let args: Vec<&str> = tokens.collect();

        let command = match name.as_str() {
            "get" => Command::Get(key_arg("get", &args)?),
            "getobj" => Command::GetObject(key_arg("getobj", &args)?),
            "set" => {
                let (key, value, ttl) = write_args("set", &args)?;
                Command::Set { key, value, ttl }
            }
            "setobj" => {
                let (key, value, ttl) = write_args("setobj", &args)?;
                Command::SetObject { key, value, ttl }
            }
            "del" => Command::Del(key_arg("del", &args)?),
            "mget" => Command::MultiGet(args.iter().map(|key| key.to_string()).collect()),
            "incr" => Command::Increment {
                key: key_arg("incr", &args)?,
                by_value: optional_number("incr", args.get(1))?,
            },
            "decr" => Command::Decrement {
                key: key_arg("decr", &args)?,
                by_value: optional_number("decr", args.get(1))?,
            },
            "touch" => Command::Touch {
                key: key_arg("touch", &args)?,
                lifetime: optional_number("touch", args.get(1))?.ok_or(
                    ParseError::MissingArgument {
                        command: "touch",
                        argument: "seconds",
                    },
                )?,
            },
            "lock" => Command::Lock {
                key: key_arg("lock", &args)?,
                ttl: optional_number("lock", args.get(1))?,
            },
            "unlock" => Command::Unlock(key_arg("unlock", &args)?),
            "flush" => Command::Flush,
            "quit" | "exit" => Command::Quit,
            other => return Err(ParseError::UnknownCommand(other.to_string())),
        };
        Ok(command)
    }
}

fn key_arg(command: &'static str, args: &[&str]) -> Result<String, ParseError> {
    args.first()
        .map(|key| key.to_string())
        .ok_or(ParseError::MissingArgument {
            command,
            argument: "key",
        })
}

fn optional_number<T: std::str::FromStr>(
    command: &'static str,
    arg: Option<&&str>,
) -> Result<Option<T>, ParseError> {
    arg.map(|raw| {
        raw.parse().map_err(|_| ParseError::InvalidNumber {
            command,
            value: raw.to_string(),
        })
    })
    .transpose()
}

fn write_args(
    command: &'static str,
    args: &[&str],
) -> Result<(String, Value, Option<u64>), ParseError> {
    let key = key_arg(command, args)?;
    let mut rest = &args[1..];
    if rest.is_empty() {
        return Err(ParseError::MissingArgument {
            command,
            argument: "value",
        });
    }

    let mut ttl = None;
    if rest.len() > 1 {
        if let Some(seconds) = rest.last().and_then(|last| last.parse::<u64>().ok()) {
            ttl = Some(seconds);
            rest = &rest[..rest.len() - 1];
        }
    }

    let text = rest.join(" ");
    let value = serde_json::from_str(&text).unwrap_or(Value::String(text));
    Ok((key, value, ttl))
}

// == Execute ==
/// Runs `command` against `cache`, returning the success payload as JSON.
///
/// Operations whose only outcome is success report `true`.
pub async fn execute(cache: &dyn Cache, command: Command) -> CacheResult<Value> {
    let done = Value::Bool(true);
    let payload = match command {
        Command::Get(key) => cache.get(&key).await?.unwrap_or(Value::Null),
        Command::GetObject(key) => cache.get_object(&key).await?.unwrap_or(Value::Null),
        Command::Set { key, value, ttl } => {
            cache.set(&key, value, ttl).await?;
            done
        }
        Command::SetObject { key, value, ttl } => {
            cache.set_object(&key, value, ttl).await?;
            done
        }
        Command::Del(key) => {
            cache.del(&key).await?;
            done
        }
        Command::MultiGet(keys) => {
            let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
            let values = cache.multi_get(&refs).await?;
            let object: Map<String, Value> = values
                .into_iter()
                .map(|(key, value)| (key, value.unwrap_or(Value::Null)))
                .collect();
            Value::Object(object)
        }
        Command::Increment { key, by_value } => Value::from(cache.increment(&key, by_value).await?),
        Command::Decrement { key, by_value } => Value::from(cache.decrement(&key, by_value).await?),
        Command::Touch { key, lifetime } => {
            cache.touch(&key, lifetime).await?;
            done
        }
        Command::Lock { key, ttl } => {
            cache.acquire_lock(&key, ttl).await?;
            done
        }
        Command::Unlock(key) => {
            cache.release_lock(&key).await?;
            done
        }
        Command::Flush => {
            cache.del_all().await?;
            done
        }
        Command::Quit => Value::Null,
    };
    Ok(payload)
}

/// Renders an outcome as one line of JSON.
pub fn render(outcome: &CacheResult<Value>) -> String {
    match outcome {
        Ok(payload) => payload.to_string(),
        Err(err) => {
            let mut reply = Map::new();
            reply.insert(
                "error".to_string(),
                serde_json::to_value(err).unwrap_or(Value::Null),
            );
            Value::Object(reply).to_string()
        }
    }
}
