//! Nested transactions.
//!
//! The outermost layer is a real transaction; every nested layer is a
//! savepoint. Layers are released in stack order: popping a layer that is
//! not on top only marks it inactive, and it is released once every layer
//! above it is gone.
//!
//! Engines that commit implicitly on DDL lose their savepoints. When
//! releasing one then fails, the extension decides through
//! [`classify_release_failure`](crate::extension::TransactionHooks::classify_release_failure)
//! whether to collapse the whole stack.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::connection::Connection;
use crate::error::{DbError, DriverError, Result};
use crate::extension::ReleaseFailure;

/// Name of the outermost layer when none is given.
pub const ROOT_TRANSACTION: &str = "polysql_transaction";

#[derive(Debug, Clone)]
struct Layer {
    name: String,
    active: bool,
    /// DDL ran while this layer was on top, or in a layer released into it.
    ddl: bool,
}

/// Ordered transaction layers of one connection.
#[derive(Debug, Default)]
pub struct TransactionStack {
    layers: Vec<Layer>,
}

impl TransactionStack {
    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Layer names, outermost first.
    pub fn names(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.name.as_str()).collect()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.layers.iter().position(|l| l.name == name)
    }

    fn push(&mut self, name: String) {
        self.layers.push(Layer {
            name,
            active: true,
            ddl: false,
        });
    }

    fn deactivate(&mut self, name: &str) -> bool {
        match self.layers.iter_mut().find(|l| l.name == name) {
            Some(layer) => {
                layer.active = false;
                true
            }
            None => false,
        }
    }

    /// Records a structural change in the innermost layer.
    pub(crate) fn mark_ddl(&mut self) {
        if let Some(layer) = self.layers.last_mut() {
            layer.ddl = true;
        }
    }

    fn top_inactive(&self) -> Option<&Layer> {
        self.layers.last().filter(|l| !l.active)
    }

    /// Removes the innermost layer; its work now belongs to the layer below.
    fn release_top(&mut self) {
        if let Some(layer) = self.layers.pop() {
            if let Some(parent) = self.layers.last_mut() {
                parent.ddl |= layer.ddl;
            }
        }
    }

    fn active_above(&self, index: usize) -> bool {
        self.layers.iter().skip(index + 1).any(|l| l.active)
    }

    fn ddl_from(&self, index: usize) -> bool {
        self.layers.iter().skip(index).any(|l| l.ddl)
    }

    fn truncate(&mut self, len: usize) {
        self.layers.truncate(len);
    }

    fn clear(&mut self) {
        self.layers.clear();
    }
}

impl Connection {
    /// Whether a transaction started through this connection is open.
    pub fn in_transaction(&self) -> bool {
        !self.transactions.is_empty()
    }

    pub fn transaction_depth(&self) -> usize {
        self.transactions.depth()
    }

    /// Names of the open layers, outermost first.
    pub fn transaction_names(&self) -> Vec<&str> {
        self.transactions.names()
    }

    /// Opens a transaction, or a savepoint when one is already open.
    ///
    /// Returns the layer name.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionNameInUse`](DbError::TransactionNameInUse) if
    /// `name` is already on the stack.
    pub fn push_transaction(&mut self, name: Option<&str>) -> Result<String> {
        let name = match name {
            Some(name) => name.to_string(),
            None if self.transactions.is_empty() => ROOT_TRANSACTION.to_string(),
            None => format!("savepoint_{}", self.transactions.depth()),
        };
        if self.transactions.contains(&name) {
            return Err(DbError::TransactionNameInUse(name));
        }
        let ext = Arc::clone(&self.extension);
        if self.transactions.is_empty() {
            self.execute_raw(ext.begin_sql())?;
        } else {
            let savepoint = self.names.quote(&name);
            self.execute_raw(&ext.savepoint_sql(&savepoint))?;
        }
        self.transactions.push(name.clone());
        debug!(name = %name, depth = self.transactions.depth(), "transaction layer opened");
        Ok(name)
    }

    /// Marks layer `name` finished and releases every finished layer on top
    /// of the stack. Releasing the outermost layer commits.
    ///
    /// Popping a layer that is no longer on the stack, because an implicit
    /// commit collapsed it, does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`CommitFailure`](DbError::CommitFailure) if the final
    /// COMMIT fails; the stack is empty afterwards. A savepoint whose
    /// release fails without collapsing the stack stays on it, so it can
    /// still be rolled back.
    pub fn pop_transaction(&mut self, name: &str) -> Result<()> {
        if !self.transactions.deactivate(name) {
            debug!(name, "transaction layer already released");
            return Ok(());
        }
        self.pop_committable()
    }

    fn pop_committable(&mut self) -> Result<()> {
        let ext = Arc::clone(&self.extension);
        while let Some(layer) = self.transactions.top_inactive().cloned() {
            if self.transactions.depth() == 1 {
                return self.commit_root();
            }
            let savepoint = self.names.quote(&layer.name);
            let Some(sql) = ext.release_savepoint_sql(&savepoint) else {
                self.transactions.release_top();
                continue;
            };
            if let Err(err) = self.execute_raw(&sql) {
                let collapse = err
                    .driver_error()
                    .is_some_and(|e| ext.classify_release_failure(e) == ReleaseFailure::CollapseAll);
                if !collapse {
                    return Err(err);
                }
                warn!(
                    savepoint = %layer.name,
                    error = %err,
                    "savepoint lost to an implicit commit, collapsing transaction stack"
                );
                self.transactions.clear();
                if self.client.in_transaction() {
                    return self.commit_root();
                }
                return Ok(());
            }
            self.transactions.release_top();
            debug!(savepoint = %layer.name, "savepoint released");
        }
        Ok(())
    }

    fn commit_root(&mut self) -> Result<()> {
        match self.execute_raw("COMMIT") {
            Ok(_) => {
                self.transactions.clear();
                debug!("transaction committed");
                Ok(())
            }
            Err(err) => {
                self.transactions.clear();
                self.invalidate_snapshot();
                if self.client.in_transaction() {
                    if let Err(rollback) = self.execute_raw("ROLLBACK") {
                        warn!(error = %rollback, "rollback after failed commit failed");
                    }
                }
                let source = err
                    .driver_error()
                    .cloned()
                    .unwrap_or_else(|| DriverError::new(0, err.to_string()));
                Err(DbError::CommitFailure { source })
            }
        }
    }

    /// Rolls back layer `name` and discards every layer above it.
    ///
    /// The cached schema snapshot is dropped when a discarded layer ran
    /// DDL. If the engine refuses the rollback and still holds the layer,
    /// the stack is left as it was.
    ///
    /// # Errors
    ///
    /// Returns [`NoActiveTransaction`](DbError::NoActiveTransaction) if
    /// `name` is not on the stack, and
    /// [`OutOfOrderRollback`](DbError::OutOfOrderRollback) after discarding
    /// layers that were still in use or when the savepoint was already gone.
    pub fn rollback_transaction(&mut self, name: &str) -> Result<()> {
        let Some(index) = self.transactions.position(name) else {
            return Err(DbError::NoActiveTransaction(name.to_string()));
        };
        let ext = Arc::clone(&self.extension);
        let out_of_order = self.transactions.active_above(index);
        if self.transactions.ddl_from(index) {
            self.invalidate_snapshot();
        }
        if index == 0 {
            if let Err(err) = self.execute_raw("ROLLBACK") {
                if !self.client.in_transaction() {
                    self.transactions.clear();
                }
                return Err(err);
            }
            self.transactions.clear();
            debug!(name, "transaction rolled back");
        } else {
            let savepoint = self.names.quote(name);
            if let Err(err) = self.execute_raw(&ext.rollback_to_savepoint_sql(&savepoint)) {
                let collapse = err
                    .driver_error()
                    .is_some_and(|e| ext.classify_release_failure(e) == ReleaseFailure::CollapseAll);
                if !collapse {
                    return Err(err);
                }
                warn!(savepoint = name, error = %err, "savepoint lost, rolling back everything");
                self.transactions.clear();
                self.invalidate_snapshot();
                if self.client.in_transaction() {
                    if let Err(rollback) = self.execute_raw("ROLLBACK") {
                        warn!(error = %rollback, "rollback after lost savepoint failed");
                    }
                }
                return Err(DbError::OutOfOrderRollback(name.to_string()));
            }
            self.transactions.truncate(index);
            debug!(savepoint = name, "rolled back to savepoint");
            self.pop_committable()?;
        }
        if out_of_order {
            warn!(name, "rollback discarded active transaction layers");
            return Err(DbError::OutOfOrderRollback(name.to_string()));
        }
        Ok(())
    }

    /// Opens a transaction layer bound to a guard.
    ///
    /// The layer is rolled back when the guard is dropped without
    /// [`commit`](Transaction::commit).
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use polysql_db::Connection;
    /// # fn demo(conn: &mut Connection) -> polysql_db::Result<()> {
    /// let mut txn = conn.start_transaction(None)?;
    /// txn.execute("UPDATE {users} SET status = 0", ())?;
    /// txn.commit()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn start_transaction(&mut self, name: Option<&str>) -> Result<Transaction<'_>> {
        let name = self.push_transaction(name)?;
        Ok(Transaction {
            conn: self,
            name,
            finished: false,
        })
    }
}

/// A transaction layer that rolls back unless committed.
pub struct Transaction<'c> {
    conn: &'c mut Connection,
    name: String,
    finished: bool,
}

impl Transaction<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Releases the layer; commits when it is the outermost one.
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.conn.pop_transaction(&self.name)
    }

    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.conn.rollback_transaction(&self.name)
    }
}

impl Deref for Transaction<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn
    }
}

impl DerefMut for Transaction<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.finished || !self.conn.transactions.contains(&self.name) {
            return;
        }
        if let Err(err) = self.conn.rollback_transaction(&self.name) {
            warn!(name = %self.name, error = %err, "rollback of dropped transaction failed");
        }
    }
}
