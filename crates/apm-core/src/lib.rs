// SPDX-License-Identifier: Apache-2.0

pub mod config;
pub mod error;
pub mod metric_names;
pub mod stats;
