//! Poison-tolerant guards for in-process cache state.

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

fn recover<G>(
    poisoned: PoisonError<G>,
    target: &'static str,
    op: &'static str,
    lock_kind: &'static str,
) -> G {
    warn!(
        op,
        target_module = target,
        lock_kind,
        result = "poisoned_recovered",
        hint = "a panic in another task left this lock poisoned; state may be partial",
        "Recovered from poisoned store lock"
    );
    poisoned.into_inner()
}

pub(crate) fn rw_read<'a, T>(
    lock: &'a RwLock<T>,
    target: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    lock.read()
        .unwrap_or_else(|poisoned| recover(poisoned, target, op, "rwlock.read"))
}

pub(crate) fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    target: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    lock.write()
        .unwrap_or_else(|poisoned| recover(poisoned, target, op, "rwlock.write"))
}

pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    target: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    lock.lock()
        .unwrap_or_else(|poisoned| recover(poisoned, target, op, "mutex.lock"))
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;

    #[test]
    fn rw_write_recovers_after_panic() {
        let lock = RwLock::new(vec![1_u8]);

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = lock.write().expect("first write acquires");
            panic!("poison the lock");
        }));

        assert!(lock.is_poisoned());
        rw_write(&lock, "cache::lock::tests", "push").push(2);
        assert_eq!(*rw_read(&lock, "cache::lock::tests", "read"), vec![1, 2]);
    }

    #[test]
    fn mutex_lock_recovers_after_panic() {
        let lock = Mutex::new(0_u32);

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = lock.lock().expect("first lock acquires");
            panic!("poison the mutex");
        }));

        *mutex_lock(&lock, "cache::lock::tests", "increment") += 1;
        assert_eq!(*mutex_lock(&lock, "cache::lock::tests", "read"), 1);
    }
}
