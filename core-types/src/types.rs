// Copyright (c) James Kassemi, SC, US. All rights reserved.

use std::fmt::Debug;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

/// A single metric value that can be ordered and combined.
///
/// `sum` must be commutative: several samples merged into one second bucket have to produce
/// the same total regardless of arrival order. `less` must be a strict weak ordering.
pub trait Entry: Clone {
    fn less(&self, other: &Self) -> bool;
    fn sum(&self, other: &Self) -> Self;
}

/// An [`Entry`] that also names the series it belongs to and the aggregate it rolls into.
///
/// Several identities (e.g. one per host) share a `merge_key` (e.g. the host group); the
/// multi-key window keeps the group total under that merge key.
pub trait Keyed: Entry {
    type Key: Hash + Eq + Clone + Debug;

    fn key(&self) -> Self::Key;
    fn merge_key(&self) -> Self::Key;
}

/// An entry stamped with the epoch second it was committed at.
///
/// `entry == None` means "no data": never written, stale, or an expired maximum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point<E> {
    pub entry: Option<E>,
    pub ctime: i64,
}

impl<E> Point<E> {
    pub fn new(entry: E, ctime: i64) -> Self {
        Self {
            entry: Some(entry),
            ctime,
        }
    }

    pub fn empty(ctime: i64) -> Self {
        Self { entry: None, ctime }
    }

    pub fn is_empty(&self) -> bool {
        self.entry.is_none()
    }

    /// Seconds elapsed between `ctime` and `now`.
    pub fn age(&self, now: i64) -> i64 {
        now.saturating_sub(self.ctime)
    }
}

impl<E> Default for Point<E> {
    fn default() -> Self {
        Self::empty(0)
    }
}

/// A keyed value placed on a second of the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyedPoint<T> {
    pub value: T,
    pub time: i64,
}

impl<T> KeyedPoint<T> {
    pub fn new(value: T, time: i64) -> Self {
        Self { value, time }
    }
}

macro_rules! integer_entry {
    ($($ty:ty),*) => {
        $(
            impl Entry for $ty {
                fn less(&self, other: &Self) -> bool {
                    self < other
                }

                fn sum(&self, other: &Self) -> Self {
                    self.saturating_add(*other)
                }
            }
        )*
    };
}

integer_entry!(i64, u64);

impl Entry for f64 {
    fn less(&self, other: &Self) -> bool {
        self < other
    }

    fn sum(&self, other: &Self) -> Self {
        self + other
    }
}
