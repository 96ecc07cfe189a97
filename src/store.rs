//! Reactive store contract
//!
//! The persistence adapter only needs three things from a store: read the
//! current state, replace it wholesale, and get told when it changes.
//! `LocalStore` is a single-threaded implementation of that contract.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// A reactive state container
pub trait Store {
    type State: Clone + 'static;

    /// Snapshot of the current state
    fn get_raw_state(&self) -> Self::State;

    /// Replace the state with the producer's result and notify listeners
    fn update<F>(&self, producer: F)
    where
        F: FnOnce() -> Self::State;

    /// Call `listener` whenever the slice picked by `selector` changes
    fn subscribe<S, F, L>(&self, selector: F, listener: L) -> Subscription
    where
        S: PartialEq + 'static,
        F: Fn(&Self::State) -> S + 'static,
        L: Fn(&S) + 'static;
}

/// Handle to a registered listener.
///
/// Dropping the handle leaves the listener registered; call
/// [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

type Listener<T> = Rc<dyn Fn(&T)>;

struct Inner<T> {
    state: RefCell<T>,
    listeners: RefCell<Vec<(u64, Listener<T>)>>,
    next_id: RefCell<u64>,
}

/// Single-threaded reactive store. Clones share the same state.
pub struct LocalStore<T> {
    inner: Rc<Inner<T>>,
}

impl<T> Clone for LocalStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + 'static> LocalStore<T> {
    pub fn new(initial: T) -> Self {
        Self {
            inner: Rc::new(Inner {
                state: RefCell::new(initial),
                listeners: RefCell::new(Vec::new()),
                next_id: RefCell::new(0),
            }),
        }
    }

    /// Replace the state directly
    pub fn replace(&self, state: T) {
        self.update(move || state);
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    fn notify(&self) {
        // Snapshot so listeners may subscribe/unsubscribe while being called
        let state = self.inner.state.borrow().clone();
        let listeners: Vec<Listener<T>> = self
            .inner
            .listeners
            .borrow()
            .iter()
            .map(|(_, l)| Rc::clone(l))
            .collect();
        for listener in listeners {
            listener(&state);
        }
    }
}

impl<T: Clone + 'static> Store for LocalStore<T> {
    type State = T;

    fn get_raw_state(&self) -> T {
        self.inner.state.borrow().clone()
    }

    fn update<F>(&self, producer: F)
    where
        F: FnOnce() -> T,
    {
        let next = producer();
        *self.inner.state.borrow_mut() = next;
        self.notify();
    }

    fn subscribe<S, F, L>(&self, selector: F, listener: L) -> Subscription
    where
        S: PartialEq + 'static,
        F: Fn(&T) -> S + 'static,
        L: Fn(&S) + 'static,
    {
        let last = RefCell::new(selector(&*self.inner.state.borrow()));
        let wrapped: Listener<T> = Rc::new(move |state: &T| {
            let selected = selector(state);
            if *last.borrow() == selected {
                return;
            }
            listener(&selected);
            *last.borrow_mut() = selected;
        });

        let id = {
            let mut next_id = self.inner.next_id.borrow_mut();
            *next_id += 1;
            *next_id
        };
        self.inner.listeners.borrow_mut().push((id, wrapped));

        let weak: Weak<Inner<T>> = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.listeners.borrow_mut().retain(|(lid, _)| *lid != id);
            }
        })
    }
}
