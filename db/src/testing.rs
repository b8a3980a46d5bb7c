//! A scripted [`Client`] for exercising connections without a server.
//!
//! The client records every statement it receives, answers queries from
//! queued result sets, fails statements on demand, and tracks transaction
//! and savepoint state the way a server would, optionally committing
//! implicitly on DDL.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::client::{Client, ExecOutcome, Params, ResultSet};
use crate::error::DriverError;

#[derive(Debug, Default)]
struct ScriptState {
    statements: Vec<String>,
    queries: VecDeque<(String, ResultSet)>,
    executions: VecDeque<(String, ExecOutcome)>,
    failures: VecDeque<(String, DriverError)>,
    in_transaction: bool,
    savepoints: Vec<String>,
    implicit_commit_on_ddl: bool,
    missing_savepoint: Option<DriverError>,
}

impl ScriptState {
    fn take_failure(&mut self, sql: &str) -> Option<DriverError> {
        let index = self.failures.iter().position(|(p, _)| sql.contains(p.as_str()))?;
        self.failures.remove(index).map(|(_, err)| err)
    }

    fn track(&mut self, sql: &str) -> Result<(), DriverError> {
        let upper = sql.trim().to_ascii_uppercase();
        let words: Vec<&str> = upper.split_whitespace().collect();
        match words.as_slice() {
            ["BEGIN", ..] | ["START", "TRANSACTION", ..] | ["SET", "TRANSACTION", ..] => {
                self.in_transaction = true;
                self.savepoints.clear();
            }
            ["COMMIT"] | ["ROLLBACK"] => {
                self.in_transaction = false;
                self.savepoints.clear();
            }
            ["SAVEPOINT", name] => self.savepoints.push(name.to_string()),
            ["RELEASE", "SAVEPOINT", name] => {
                let position = self.savepoint(name)?;
                self.savepoints.truncate(position);
            }
            ["ROLLBACK", "TO", "SAVEPOINT", name] => {
                let position = self.savepoint(name)?;
                self.savepoints.truncate(position + 1);
            }
            [first, ..]
                if self.implicit_commit_on_ddl
                    && matches!(*first, "CREATE" | "ALTER" | "DROP" | "RENAME" | "TRUNCATE") =>
            {
                self.in_transaction = false;
                self.savepoints.clear();
            }
            _ => {}
        }
        Ok(())
    }

    fn savepoint(&self, name: &str) -> Result<usize, DriverError> {
        match self.savepoints.iter().position(|s| s == name) {
            Some(position) => Ok(position),
            None => match &self.missing_savepoint {
                Some(err) => Err(err.clone()),
                None => Ok(self.savepoints.len()),
            },
        }
    }
}

/// A client that follows a script.
///
/// Clones share state, so a test can keep one handle while the connection
/// owns another.
///
/// # Examples
///
/// ```
/// use polysql_core::Value;
/// use polysql_db::testing::ScriptedClient;
/// use polysql_db::{Connection, ConnectionConfig, ResultSet};
///
/// let client = ScriptedClient::new();
/// client.on_query("FROM users", ResultSet::new(["n"], vec![vec![Value::Integer(2)]]));
///
/// let mut conn = Connection::from_client(ConnectionConfig::new("mysql", "site"), client.boxed()).unwrap();
/// let count = conn.query("SELECT COUNT(*) AS n FROM {users}", ()).unwrap().fetch_field(0);
/// assert_eq!(count, Some(Value::Integer(2)));
/// assert!(client.statements().contains(&"SELECT COUNT(*) AS n FROM users".to_string()));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ScriptedClient {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit any open transaction when a DDL statement runs.
    pub fn implicit_commit_on_ddl(self, enabled: bool) -> Self {
        self.lock().implicit_commit_on_ddl = enabled;
        self
    }

    /// Error reported when releasing or rolling back to an unknown
    /// savepoint. Without one, such statements succeed.
    pub fn missing_savepoint_error(
        self,
        code: i64,
        sqlstate: &str,
        message: &str,
    ) -> Self {
        let mut err = DriverError::new(code, message);
        if !sqlstate.is_empty() {
            err = err.with_sqlstate(sqlstate);
        }
        self.lock().missing_savepoint = Some(err);
        self
    }

    /// Queues `result` for the next query containing `pattern`.
    pub fn on_query(&self, pattern: &str, result: ResultSet) {
        self.lock().queries.push_back((pattern.to_string(), result));
    }

    /// Queues `outcome` for the next statement containing `pattern`.
    pub fn on_execute(&self, pattern: &str, outcome: ExecOutcome) {
        self.lock().executions.push_back((pattern.to_string(), outcome));
    }

    /// Fails the next statement containing `pattern` with `error`.
    pub fn fail_on(&self, pattern: &str, error: DriverError) {
        self.lock().failures.push_back((pattern.to_string(), error));
    }

    /// Every statement received so far, in order.
    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    /// Savepoints the engine holds, outermost first, upper-cased.
    pub fn savepoints(&self) -> Vec<String> {
        self.lock().savepoints.clone()
    }

    pub fn clear_statements(&self) {
        self.lock().statements.clear();
    }

    /// A boxed handle sharing this client's state.
    pub fn boxed(&self) -> Box<dyn Client> {
        Box::new(self.clone())
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn receive(&self, sql: &str) -> Result<MutexGuard<'_, ScriptState>, DriverError> {
        let mut state = self.lock();
        state.statements.push(sql.to_string());
        if let Some(err) = state.take_failure(sql) {
            return Err(err);
        }
        state.track(sql)?;
        Ok(state)
    }
}

impl Client for ScriptedClient {
    fn execute(&mut self, sql: &str, _params: &Params) -> Result<ExecOutcome, DriverError> {
        let mut state = self.receive(sql)?;
        let index = state
            .executions
            .iter()
            .position(|(p, _)| sql.contains(p.as_str()));
        Ok(index
            .and_then(|i| state.executions.remove(i))
            .map(|(_, outcome)| outcome)
            .unwrap_or_default())
    }

    fn query(&mut self, sql: &str, _params: &Params) -> Result<ResultSet, DriverError> {
        let mut state = self.receive(sql)?;
        let index = state
            .queries
            .iter()
            .position(|(p, _)| sql.contains(p.as_str()));
        Ok(index
            .and_then(|i| state.queries.remove(i))
            .map(|(_, result)| result)
            .unwrap_or_default())
    }

    fn in_transaction(&self) -> bool {
        self.lock().in_transaction
    }

    fn client_version(&self) -> String {
        "scripted".to_string()
    }
}
