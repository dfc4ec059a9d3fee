//! Re-entrant lock guarding the render context.
//!
//! Both the UI thread (drawing) and the compute thread (texture uploads)
//! need the context, and render-side helpers call each other while already
//! holding it. A plain [`std::sync::Mutex`] would deadlock on the nested
//! acquisition, so ownership is tracked by thread id with an acquisition
//! depth, and the protected state lives in a [`RefCell`] so nested guards
//! on the owning thread never hold two `&mut` at once.

use std::cell::{RefCell, RefMut};
use std::sync::{Condvar, Mutex};
use std::thread::{self, ThreadId};

#[derive(Debug, Default)]
struct OwnerState {
    owner: Option<ThreadId>,
    depth: u32,
}

/// Re-entrant mutex over `T`.
#[derive(Debug)]
pub struct RenderLock<T> {
    state: Mutex<OwnerState>,
    released: Condvar,
    data: RefCell<T>,
}

// The RefCell is only touched by the lock owner, and ownership transfer
// goes through the Mutex, so sharing the lock across threads is sound for
// any T that can move between threads.
unsafe impl<T: Send> Send for RenderLock<T> {}
unsafe impl<T: Send> Sync for RenderLock<T> {}

impl<T> RenderLock<T> {
    pub fn new(data: T) -> Self {
        Self {
            state: Mutex::new(OwnerState::default()),
            released: Condvar::new(),
            data: RefCell::new(data),
        }
    }

    /// Acquires the lock, blocking unless this thread already holds it.
    pub fn acquire(&self) -> ContextGuard<'_, T> {
        let me = thread::current().id();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            match state.owner {
                None => {
                    state.owner = Some(me);
                    state.depth = 1;
                    break;
                }
                Some(owner) if owner == me => {
                    state.depth += 1;
                    break;
                }
                Some(_) => {
                    state = self
                        .released
                        .wait(state)
                        .unwrap_or_else(|e| e.into_inner());
                }
            }
        }
        ContextGuard { lock: self }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

/// Proof of holding a [`RenderLock`]; releases one acquisition on drop.
pub struct ContextGuard<'a, T> {
    lock: &'a RenderLock<T>,
}

impl<T> ContextGuard<'_, T> {
    /// Borrows the protected state mutably.
    ///
    /// Each call site takes its own short-lived borrow, so nested guards on
    /// the same thread work as long as no two borrows overlap.
    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.lock.data.borrow_mut()
    }
}

impl<T> Drop for ContextGuard<'_, T> {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock().unwrap_or_else(|e| e.into_inner());
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            drop(state);
            self.lock.released.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn nested_acquisition_does_not_deadlock() {
        let lock = RenderLock::new(0u32);
        let outer = lock.acquire();
        *outer.borrow_mut() += 1;
        {
            let inner = lock.acquire();
            *inner.borrow_mut() += 1;
        }
        *outer.borrow_mut() += 1;
        drop(outer);
        assert_eq!(lock.into_inner(), 3);
    }

    #[test]
    fn excludes_other_threads_while_held() {
        let lock = Arc::new(RenderLock::new(Vec::<u32>::new()));
        let holder_entered = Arc::new(AtomicBool::new(false));

        let contender = {
            let lock = lock.clone();
            let holder_entered = holder_entered.clone();
            thread::spawn(move || {
                while !holder_entered.load(Ordering::SeqCst) {
                    thread::yield_now();
                }
                let guard = lock.acquire();
                guard.borrow_mut().push(2);
            })
        };

        {
            let guard = lock.acquire();
            holder_entered.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(30));
            guard.borrow_mut().push(1);
        }
        contender.join().unwrap();

        let guard = lock.acquire();
        assert_eq!(*guard.borrow_mut(), vec![1, 2]);
    }

    #[test]
    fn many_threads_serialize() {
        let lock = Arc::new(RenderLock::new(0u64));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = lock.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..200 {
                    let guard = lock.acquire();
                    // Re-entrant grab inside the critical section.
                    let inner = lock.acquire();
                    let v = *inner.borrow_mut();
                    drop(inner);
                    *guard.borrow_mut() = v + 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let guard = lock.acquire();
        assert_eq!(*guard.borrow_mut(), 8 * 200);
    }
}
