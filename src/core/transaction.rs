//! Call-scoped transactions with commit/rollback members.
//!
//! A [`Transaction`] is opened by [`RunContext::call`] around every job body.
//! Components that need to act only if the body succeeds register a
//! [`TransactionMember`]; the deferred operation queue uses this to promote
//! staged elements on commit and discard them on rollback.
//!
//! [`RunContext::call`]: crate::core::RunContext::call

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{error, trace};

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of a transaction, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// Participant in a transaction's outcome.
pub trait TransactionMember: Send {
    /// Stable identifier; a transaction holds at most one member per id.
    fn member_id(&self) -> &str;

    /// Apply the member's work. Called in registration order on commit.
    ///
    /// # Errors
    ///
    /// A failure aborts the commit; members not yet committed are rolled back.
    fn commit(&self) -> anyhow::Result<()>;

    /// Discard the member's work.
    fn rollback(&self);
}

/// A unit of work that ends in commit or rollback.
///
/// Dropping a transaction that was neither committed nor rolled back rolls it
/// back, so a panicking body never commits.
pub struct Transaction {
    id: TransactionId,
    members: Mutex<Vec<Box<dyn TransactionMember>>>,
}

impl Transaction {
    /// Open a new transaction.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: TransactionId(NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed)),
            members: Mutex::new(Vec::new()),
        }
    }

    /// Identifier of this transaction.
    #[must_use]
    pub const fn id(&self) -> TransactionId {
        self.id
    }

    /// Register a member unless one with the same id is already present.
    ///
    /// Returns whether the member was added.
    pub fn register_member(&self, member: Box<dyn TransactionMember>) -> bool {
        let mut members = self.members.lock();
        if members.iter().any(|m| m.member_id() == member.member_id()) {
            return false;
        }
        trace!(tx = %self.id, member = member.member_id(), "registered transaction member");
        members.push(member);
        true
    }

    /// Whether a member with this id is registered.
    #[must_use]
    pub fn has_member(&self, member_id: &str) -> bool {
        self.members.lock().iter().any(|m| m.member_id() == member_id)
    }

    /// Commit every member in registration order.
    ///
    /// # Errors
    ///
    /// Returns the first member failure; the failing member and every member
    /// after it are rolled back.
    pub fn commit(self) -> anyhow::Result<()> {
        let members = std::mem::take(&mut *self.members.lock());
        let mut pending = members.iter();
        while let Some(member) = pending.next() {
            if let Err(err) = member.commit() {
                error!(tx = %self.id, member = member.member_id(), error = %err, "transaction member failed to commit");
                member.rollback();
                for rest in pending.by_ref() {
                    rest.rollback();
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Roll back every member.
    pub fn rollback(self) {
        let members = std::mem::take(&mut *self.members.lock());
        for member in &members {
            member.rollback();
        }
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("members", &self.members.lock().len())
            .finish()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        for member in self.members.get_mut().drain(..) {
            member.rollback();
        }
    }
}
