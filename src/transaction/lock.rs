//! Row Lock Coordinator
//!
//! Exclusive row locks owned by sessions. A session that asks for a row it
//! already holds is granted again immediately. Waiters block on a condition
//! variable; before each wait the wait-for graph is checked and the requester
//! is chosen as the deadlock victim when waiting would close a cycle.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::storage::RowId;

/// Session identifier
pub type SessionId = u64;

/// How long a lock request may block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitPolicy {
    /// Fail with a conflict instead of waiting (NOWAIT)
    NoWait,
    /// Wait at most this many milliseconds
    Timeout(u64),
    /// Wait until the lock is released or a deadlock is detected
    Forever,
}

impl WaitPolicy {
    pub fn timeout(duration: Duration) -> Self {
        WaitPolicy::Timeout(duration.as_millis() as u64)
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        WaitPolicy::Timeout(5_000)
    }
}

/// Result of a lock request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Granted,
    Conflict,
    Deadlock,
    Timeout,
}

/// Grants and releases exclusive row locks
pub trait RowLockCoordinator: Send + Sync {
    fn try_lock(&self, row: &RowId, session: SessionId, wait: WaitPolicy) -> LockOutcome;

    fn release(&self, row: &RowId, session: SessionId);

    fn release_all(&self, session: SessionId);

    /// Session currently holding the row, if any
    fn holder(&self, row: &RowId) -> Option<SessionId>;

    fn holds(&self, row: &RowId, session: SessionId) -> bool {
        self.holder(row) == Some(session)
    }

    /// Lock a row, turning anything but a grant into the matching error
    fn acquire(&self, row: &RowId, session: SessionId, wait: WaitPolicy) -> Result<()> {
        match self.try_lock(row, session, wait) {
            LockOutcome::Granted => Ok(()),
            LockOutcome::Conflict => Err(Error::LockConflict(row.clone())),
            LockOutcome::Deadlock => Err(Error::Deadlock(row.clone())),
            LockOutcome::Timeout => Err(Error::LockTimeout(row.clone())),
        }
    }
}

#[derive(Debug, Default)]
struct LockTable {
    /// Row -> holding session
    holders: HashMap<RowId, SessionId>,
    /// Session -> rows it holds
    owned: HashMap<SessionId, HashSet<RowId>>,
    /// Waiting session -> session it waits for
    waits_for: HashMap<SessionId, SessionId>,
}

impl LockTable {
    fn grant(&mut self, row: &RowId, session: SessionId) {
        self.holders.insert(row.clone(), session);
        self.owned.entry(session).or_default().insert(row.clone());
        self.waits_for.remove(&session);
    }

    /// Would `requester` waiting on `holder` close a cycle in the wait-for graph?
    fn would_deadlock(&self, requester: SessionId, holder: SessionId) -> bool {
        let mut current = holder;
        let mut visited = HashSet::new();
        while let Some(&next) = self.waits_for.get(&current) {
            if next == requester {
                return true;
            }
            if !visited.insert(next) {
                break;
            }
            current = next;
        }
        false
    }
}

/// In-process lock manager
#[derive(Debug, Default)]
pub struct LockManager {
    table: Mutex<LockTable>,
    released: Condvar,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows a session holds
    pub fn held_count(&self, session: SessionId) -> usize {
        self.table
            .lock()
            .unwrap()
            .owned
            .get(&session)
            .map_or(0, |rows| rows.len())
    }
}

impl RowLockCoordinator for LockManager {
    fn try_lock(&self, row: &RowId, session: SessionId, wait: WaitPolicy) -> LockOutcome {
        let deadline = match wait {
            WaitPolicy::Timeout(ms) => Some(Instant::now() + Duration::from_millis(ms)),
            WaitPolicy::NoWait | WaitPolicy::Forever => None,
        };

        let mut table = self.table.lock().unwrap();
        loop {
            let holder = match table.holders.get(row) {
                None => {
                    table.grant(row, session);
                    debug!(%row, session, "row lock granted");
                    return LockOutcome::Granted;
                }
                Some(&holder) if holder == session => {
                    table.waits_for.remove(&session);
                    return LockOutcome::Granted;
                }
                Some(&holder) => holder,
            };

            if wait == WaitPolicy::NoWait {
                return LockOutcome::Conflict;
            }
            if table.would_deadlock(session, holder) {
                table.waits_for.remove(&session);
                warn!(%row, session, holder, "deadlock detected, requester chosen as victim");
                return LockOutcome::Deadlock;
            }
            table.waits_for.insert(session, holder);

            table = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        table.waits_for.remove(&session);
                        warn!(%row, session, holder, "row lock wait timed out");
                        return LockOutcome::Timeout;
                    }
                    self.released.wait_timeout(table, deadline - now).unwrap().0
                }
                None => self.released.wait(table).unwrap(),
            };
        }
    }

    fn release(&self, row: &RowId, session: SessionId) {
        let mut table = self.table.lock().unwrap();
        if table.holders.get(row) == Some(&session) {
            table.holders.remove(row);
            if let Some(rows) = table.owned.get_mut(&session) {
                rows.remove(row);
            }
            debug!(%row, session, "row lock released");
            self.released.notify_all();
        }
    }

    fn release_all(&self, session: SessionId) {
        let mut table = self.table.lock().unwrap();
        let rows = table.owned.remove(&session).unwrap_or_default();
        for row in &rows {
            table.holders.remove(row);
        }
        table.waits_for.remove(&session);
        if !rows.is_empty() {
            debug!(session, count = rows.len(), "released all row locks");
        }
        self.released.notify_all();
    }

    fn holder(&self, row: &RowId) -> Option<SessionId> {
        self.table.lock().unwrap().holders.get(row).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{mpsc, Arc};
    use std::thread;

    fn row(slot: u64) -> RowId {
        RowId::new("emp", slot)
    }

    #[test]
    fn test_reentrant_grant_and_conflict() {
        let locks = LockManager::new();
        assert_eq!(locks.try_lock(&row(1), 1, WaitPolicy::NoWait), LockOutcome::Granted);
        assert_eq!(locks.try_lock(&row(1), 1, WaitPolicy::NoWait), LockOutcome::Granted);
        assert_eq!(locks.try_lock(&row(1), 2, WaitPolicy::NoWait), LockOutcome::Conflict);
        assert!(locks.holds(&row(1), 1));
        assert_eq!(locks.held_count(1), 1);

        locks.release(&row(1), 2);
        assert!(locks.holds(&row(1), 1));
        locks.release(&row(1), 1);
        assert_eq!(locks.holder(&row(1)), None);
    }

    #[test]
    fn test_timeout_holds_no_new_lock() {
        let locks = LockManager::new();
        locks.try_lock(&row(1), 1, WaitPolicy::NoWait);

        let outcome = locks.try_lock(&row(1), 2, WaitPolicy::Timeout(20));
        assert_eq!(outcome, LockOutcome::Timeout);
        assert_eq!(locks.held_count(2), 0);
        assert!(matches!(
            locks.acquire(&row(1), 2, WaitPolicy::Timeout(5)),
            Err(Error::LockTimeout(_))
        ));
    }

    #[test]
    fn test_waiter_granted_after_release() {
        let locks = Arc::new(LockManager::new());
        locks.try_lock(&row(1), 1, WaitPolicy::NoWait);

        let waiter = {
            let locks = locks.clone();
            thread::spawn(move || locks.try_lock(&row(1), 2, WaitPolicy::Forever))
        };
        thread::sleep(Duration::from_millis(30));
        locks.release_all(1);

        assert_eq!(waiter.join().unwrap(), LockOutcome::Granted);
        assert!(locks.holds(&row(1), 2));
    }

    #[test]
    fn test_deadlock_detected() {
        let locks = Arc::new(LockManager::new());
        locks.try_lock(&row(1), 1, WaitPolicy::NoWait);
        locks.try_lock(&row(2), 2, WaitPolicy::NoWait);

        let (tx, rx) = mpsc::channel();
        let first = {
            let locks = locks.clone();
            thread::spawn(move || {
                tx.send(()).unwrap();
                locks.try_lock(&row(2), 1, WaitPolicy::Timeout(2_000))
            })
        };
        rx.recv().unwrap();
        thread::sleep(Duration::from_millis(50));

        // session 2 waiting on row 1 would close the cycle
        assert_eq!(
            locks.try_lock(&row(1), 2, WaitPolicy::Forever),
            LockOutcome::Deadlock
        );
        locks.release_all(2);
        assert_eq!(first.join().unwrap(), LockOutcome::Granted);
    }
}
