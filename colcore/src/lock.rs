//! Scoped lock guards (spec §9 Design Notes: "Friend-class access to
//! per-column locks"). A column's value storage and cached index are
//! reachable only through these guards; `idxcnt` tracks live index readers
//! so `unload_index` can refuse to evict an index someone still holds.

use crate::column::{Column, ColumnData};
use colindex::BinIndex;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::Ordering;
use std::sync::{RwLockReadGuard, RwLockWriteGuard};

pub struct ReadLock<'a> {
    pub(crate) guard: RwLockReadGuard<'a, ColumnData>,
}

impl<'a> Deref for ReadLock<'a> {
    type Target = ColumnData;
    fn deref(&self) -> &ColumnData {
        &self.guard
    }
}

pub struct WriteLock<'a> {
    pub(crate) guard: RwLockWriteGuard<'a, ColumnData>,
}

impl<'a> Deref for WriteLock<'a> {
    type Target = ColumnData;
    fn deref(&self) -> &ColumnData {
        &self.guard
    }
}

impl<'a> DerefMut for WriteLock<'a> {
    fn deref_mut(&mut self) -> &mut ColumnData {
        &mut self.guard
    }
}

/// A non-blocking write attempt; `acquired()` tells the caller whether it
/// actually got the lock. Used by maintenance paths (e.g. `purge_index_file`)
/// that should skip rather than block when a writer already holds the data.
pub struct SoftWriteLock<'a> {
    guard: Option<RwLockWriteGuard<'a, ColumnData>>,
}

impl<'a> SoftWriteLock<'a> {
    pub(crate) fn try_new(column: &'a Column) -> Self {
        SoftWriteLock { guard: column.data.try_write().ok() }
    }

    pub fn acquired(&self) -> bool {
        self.guard.is_some()
    }

    pub fn get(&self) -> Option<&ColumnData> {
        self.guard.as_deref()
    }
}

/// A read lock on the column's cached bin index, held for as long as a
/// caller is actively consulting it. Bumps `idxcnt` on construction and
/// decrements it on drop so `unload_index` can see that an index is in use.
pub struct IndexLock<'a> {
    guard: RwLockReadGuard<'a, Option<BinIndex>>,
    column: &'a Column,
}

impl<'a> IndexLock<'a> {
    pub(crate) fn new(column: &'a Column) -> Self {
        column.idxcnt.fetch_add(1, Ordering::AcqRel);
        let guard = column.index.read().expect("column index lock poisoned");
        IndexLock { guard, column }
    }

    pub fn get(&self) -> Option<&BinIndex> {
        self.guard.as_ref()
    }
}

impl<'a> Drop for IndexLock<'a> {
    fn drop(&mut self) {
        self.column.idxcnt.fetch_sub(1, Ordering::AcqRel);
    }
}
