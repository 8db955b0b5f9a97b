use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::{debug, error};

use crate::engine::{RuleEngine, Transaction};

/// One engine transaction, owned by exactly one stream.
///
/// [`close`](Self::close) consumes the scope, so a transaction cannot be
/// released twice.
pub struct TransactionScope {
    tx: Box<dyn Transaction>,
    rule_set: String,
}

impl TransactionScope {
    /// Open a transaction bound to `engine` for the life of the stream.
    pub fn open(engine: &Arc<dyn RuleEngine>) -> Self {
        let tx = engine.new_transaction();
        debug!(tx_id = %tx.id(), rule_set = %engine.name(), "Transaction opened");
        TransactionScope {
            tx,
            rule_set: engine.name().to_string(),
        }
    }

    pub fn rule_set(&self) -> &str {
        &self.rule_set
    }

    /// Release engine resources.
    pub fn close(mut self) {
        if let Err(e) = self.tx.close() {
            error!(tx_id = %self.tx.id(), error = %e, "Failed to close transaction");
        }
    }
}

impl Deref for TransactionScope {
    type Target = dyn Transaction;

    fn deref(&self) -> &Self::Target {
        self.tx.as_ref()
    }
}

impl DerefMut for TransactionScope {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.tx.as_mut()
    }
}
