//! Transaction lifecycle for transactional channels.
//!
//! A [`TransactionScope`] owns at most one open transport transaction and is
//! passed explicitly to channel operations, which keeps the channels
//! themselves free of mutable state. A scope dropped while open rolls its
//! transaction back.
//!
//! ```text
//! Unopened --begin--> Open --commit/rollback--> Unopened
//! ```

use crate::error::ChannelError;
use crate::message::TransactionId;
use crate::transport::QueueTransport;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "transaction_tests.rs"]
mod tests;

/// Lifecycle state of a [`TransactionScope`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Unopened,
    Open,
}

/// One unit of work at a time against a transport.
///
/// Not meant to be shared between tasks; operations take `&mut self`.
pub struct TransactionScope {
    transport: Arc<dyn QueueTransport>,
    open: Option<TransactionId>,
}

impl TransactionScope {
    pub fn new(transport: Arc<dyn QueueTransport>) -> Self {
        Self {
            transport,
            open: None,
        }
    }

    pub fn state(&self) -> TransactionState {
        match self.open {
            Some(_) => TransactionState::Open,
            None => TransactionState::Unopened,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Identifier of the open transaction, if any
    pub fn transaction_id(&self) -> Option<&TransactionId> {
        self.open.as_ref()
    }

    /// Start a new transaction.
    ///
    /// # Errors
    ///
    /// `TransactionAlreadyOpen` if this scope already has one open; the
    /// open transaction is left untouched.
    pub async fn begin(&mut self) -> Result<(), ChannelError> {
        if self.open.is_some() {
            return Err(ChannelError::TransactionAlreadyOpen);
        }

        let id = self.transport.begin_transaction().await?;
        debug!(transaction = %id, "Transaction opened");
        self.open = Some(id);
        Ok(())
    }

    /// Commit the open transaction.
    ///
    /// # Errors
    ///
    /// `TransactionNotOpen` if nothing is open. A transport failure leaves
    /// the transaction open so the caller may retry or roll back.
    pub async fn commit(&mut self) -> Result<(), ChannelError> {
        let id = self.open.as_ref().ok_or(ChannelError::TransactionNotOpen)?;
        self.transport.commit(id).await?;

        info!(transaction = %id, "Transaction committed");
        self.open = None;
        Ok(())
    }

    /// Roll back the open transaction.
    ///
    /// # Errors
    ///
    /// `TransactionNotOpen` if nothing is open.
    pub async fn rollback(&mut self) -> Result<(), ChannelError> {
        let id = self.open.as_ref().ok_or(ChannelError::TransactionNotOpen)?;
        self.transport.rollback(id).await?;

        debug!(transaction = %id, "Transaction rolled back");
        self.open = None;
        Ok(())
    }
}

impl std::fmt::Debug for TransactionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionScope")
            .field("transport", &self.transport.transport_name())
            .field("open", &self.open)
            .finish()
    }
}

impl Drop for TransactionScope {
    /// Roll back a transaction the owner never finished.
    ///
    /// The rollback runs on the current tokio runtime. Outside a runtime the
    /// work stays pending until the transport discards it.
    fn drop(&mut self) {
        let Some(id) = self.open.take() else {
            return;
        };

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(transaction = %id, "Transaction scope dropped outside a runtime; rollback skipped");
            return;
        };

        warn!(transaction = %id, "Transaction scope dropped while open; rolling back");
        let transport = self.transport.clone();
        handle.spawn(async move {
            match transport.rollback(&id).await {
                Ok(()) => debug!(transaction = %id, "Abandoned transaction rolled back"),
                Err(e) => warn!(transaction = %id, error = %e, "Rollback of abandoned transaction failed"),
            }
        });
    }
}
