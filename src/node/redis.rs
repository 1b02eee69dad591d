//! Blocking Redis node, enabled with the `redis` cargo feature.

use crate::node::{AtomicStoreClient, NodeError, Script, ScriptReply};
use log::debug;
use redis::{Cmd, Connection, ErrorKind, RedisError, Value};
use std::sync::{Mutex, PoisonError};

/// One independent Redis instance participating in the quorum.
pub struct RedisNode {
    name: String,
    connection: Mutex<Connection>,
}

impl RedisNode {
    /// Connects to `url` (e.g. `redis://a.example.com:6379/`).
    pub fn connect(url: &str) -> Result<Self, NodeError> {
        let client = redis::Client::open(url).map_err(connection_error)?;
        let connection = client.get_connection().map_err(connection_error)?;
        debug!("Connected to redis node {url}");
        Ok(Self {
            name: url.to_string(),
            connection: Mutex::new(connection),
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn query(&self, cmd: &Cmd) -> Result<ScriptReply, NodeError> {
        let mut connection = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let value: Value = cmd.query(&mut *connection).map_err(command_error)?;
        Ok(match value {
            Value::Int(count) => ScriptReply::Integer(count),
            other => ScriptReply::Other(format!("{other:?}")),
        })
    }
}

impl AtomicStoreClient for RedisNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn eval_cached(
        &self,
        script: &Script,
        keys: &[String],
        args: &[String],
    ) -> Result<ScriptReply, NodeError> {
        self.query(&script_command("EVALSHA", script.digest(), keys, args))
    }

    fn eval(
        &self,
        script: &Script,
        keys: &[String],
        args: &[String],
    ) -> Result<ScriptReply, NodeError> {
        self.query(&script_command("EVAL", script.body(), keys, args))
    }

    fn quit(&self) -> Result<(), NodeError> {
        let mut connection = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        redis::cmd("QUIT")
            .query::<()>(&mut *connection)
            .map_err(command_error)
    }
}

fn script_command(verb: &str, script: &str, keys: &[String], args: &[String]) -> Cmd {
    let mut cmd = redis::cmd(verb);
    cmd.arg(script).arg(keys.len());
    for key in keys {
        cmd.arg(key);
    }
    for arg in args {
        cmd.arg(arg);
    }
    cmd
}

fn connection_error(err: RedisError) -> NodeError {
    NodeError::Connection(err.to_string())
}

fn command_error(err: RedisError) -> NodeError {
    if err.kind() == ErrorKind::NoScriptError {
        NodeError::NoScript(err.to_string())
    } else if err.is_io_error() || err.is_connection_dropped() {
        NodeError::Connection(err.to_string())
    } else {
        NodeError::Response(err.to_string())
    }
}
