// SPDX-License-Identifier: Apache-2.0

//! Transaction naming. Names compete by priority; a frozen name rejects
//! every further update regardless of priority.

use apm_core::metric_names::SEGMENT_DELIMITER;

/// Naming sources ordered by how authoritative they are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NamePriority {
    None,
    StatusCode,
    Uri,
    FrameworkLow,
    Framework,
    FrameworkHigh,
    Custom,
}

#[derive(Debug, Clone)]
pub struct TransactionName {
    name: String,
    priority: NamePriority,
    frozen: bool,
}

impl Default for TransactionName {
    fn default() -> Self {
        TransactionName {
            name: String::new(),
            priority: NamePriority::None,
            frozen: false,
        }
    }
}

impl TransactionName {
    /// Apply a candidate name. Returns whether it won. Equal priority wins,
    /// so later naming at the same level refines earlier naming.
    pub fn set(
        &mut self,
        priority: NamePriority,
        freeze: bool,
        category: &str,
        parts: &[&str],
    ) -> bool {
        if self.frozen || priority < self.priority {
            return false;
        }
        let mut segments = Vec::with_capacity(1 + parts.len());
        segments.push(category);
        segments.extend(
            parts
                .iter()
                .map(|part| part.trim_matches('/'))
                .filter(|part| !part.is_empty()),
        );
        self.name = segments.join(SEGMENT_DELIMITER);
        self.priority = priority;
        if freeze {
            self.frozen = true;
        }
        true
    }

    /// Lock the current name against all further updates.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn priority(&self) -> NamePriority {
        self.priority
    }

    pub fn as_str(&self) -> Option<&str> {
        if self.name.is_empty() {
            None
        } else {
            Some(&self.name)
        }
    }
}
