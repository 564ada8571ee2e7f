// SPDX-License-Identifier: Apache-2.0

//! Transaction correlation model: transactions, activities, tracer trees,
//! async tokens, segments, and the registry plus timeout sweeper that keep
//! them bounded.

pub mod context;
pub mod finished;
pub mod guid;
pub mod naming;
pub mod registry;
pub mod segment;
pub mod sweeper;
pub mod token;
pub mod tracer;
pub mod transaction;

pub use context::WorkContext;
pub use finished::{Attributes, ErrorInfo, FinishedTransaction, TracerRollup, TransactionListener};
pub use naming::{NamePriority, TransactionName};
pub use registry::TransactionRegistry;
pub use segment::Segment;
pub use sweeper::spawn_expiration_sweeper;
pub use token::Token;
pub use tracer::{ActivityId, TimeoutCause, TracerId, TracerKind, TracerRecord};
pub use transaction::Transaction;
