// SPDX-License-Identifier: Apache-2.0

//! Async markers. A token keeps its transaction from finishing until it is
//! expired, and lets another thread link new work onto the transaction.

use std::sync::Weak;

use crate::context::WorkContext;
use crate::transaction::Transaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenId(pub(crate) usize);

/// Holds only a weak reference: a leaked token can never keep a transaction
/// alive past its timeout.
#[derive(Debug)]
pub struct Token {
    transaction: Weak<Transaction>,
    id: TokenId,
}

impl Token {
    pub(crate) fn new(transaction: Weak<Transaction>, id: TokenId) -> Self {
        Token { transaction, id }
    }

    /// Bind the calling context to the owning transaction with a fresh
    /// activity. A token links at most once; a second link, an expired
    /// token, or a finished transaction all return false and leave the
    /// context untouched.
    pub fn link(&self, ctx: &mut WorkContext) -> bool {
        let Some(transaction) = self.transaction.upgrade() else {
            return false;
        };
        match transaction.link_token(self.id) {
            Some(activity) => {
                ctx.bind(&transaction, activity);
                true
            }
            None => false,
        }
    }

    /// Mark the token permanently unusable. Returns false when it was
    /// already expired. Expiring the last unresolved token lets the
    /// transaction finish.
    pub fn expire(&self) -> bool {
        match self.transaction.upgrade() {
            Some(transaction) => transaction.expire_token(self.id),
            None => false,
        }
    }
}
