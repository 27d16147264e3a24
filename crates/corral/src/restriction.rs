// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Restriction policies limiting how submitted tasks may run concurrently.

/// How a submitted task's placement and concurrency are constrained.
///
/// Except for [`Restriction::ThreadBound`], restrictions are keyed: the pair
/// `(restriction, key)` names a capacity bucket and at most that bucket's
/// capacity worth of tasks run concurrently. A task with an empty key (or
/// [`Restriction::None`]) is limited only by the dispatcher's global worker
/// capacity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Restriction {
    /// No constraint beyond the global worker capacity.
    None,
    /// CPU-heavy work. All intensive tasks share a single hidden bucket whose
    /// capacity equals the hardware concurrency.
    Intensive,
    /// A user-named bucket with configurable capacity (default 16).
    Custom,
    /// All tasks sharing the key run sequentially on one dedicated worker
    /// thread; the association is established on first use and is sticky.
    ThreadBound,
}

/// The reserved bucket key all intensive tasks are rewritten to.
///
/// User code must not rely on this key.
pub(crate) const INTENSIVE_KEY: &str = "_";
