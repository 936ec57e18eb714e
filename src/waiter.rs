use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::Rc;
use std::{future::Future, pin::Pin, task::{Context, Poll, Waker}};

use crate::Deferred;

/// A `Waiter` is the [`Future`] side of a [`Deferred`]. It resolves to the
/// settled `Result<T, E>` and counts as a rejection handler.
///
/// Nothing settles unless the event loop runs, so await it through
/// [`crate::runtime::block_on`] (or an executor that also drives the loop).
///
/// # Examples
///
/// ```
/// use deferred_value::{runtime, Deferred};
///
/// let (resolver, deferred) = Deferred::<String, String>::with_resolver();
/// let waiter = deferred.waiter();
/// resolver.resolve("🍓".into());
/// assert_eq!(runtime::block_on(waiter).unwrap(), Ok("🍓".to_string()));
/// ```
pub struct Waiter<T, E> {
    slot: Rc<RefCell<Slot<T, E>>>,
}

struct Slot<T, E> {
    value: Option<Result<T, E>>,
    waker: Option<Waker>,
}

impl<T, E> Slot<T, E> {
    fn complete(slot: &RefCell<Self>, value: Result<T, E>) {
        let waker = {
            let mut slot = slot.borrow_mut();
            slot.value = Some(value);
            slot.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake()
        }
    }
}

impl<T, E> Waiter<T, E>
where
    T: Clone + 'static,
    E: Clone + Debug + 'static,
{
    pub(crate) fn new(deferred: &Deferred<T, E>) -> Self {
        let slot = Rc::new(RefCell::new(Slot {
            value: None,
            waker: None,
        }));
        let fulfilled = Rc::clone(&slot);
        let rejected = Rc::clone(&slot);
        deferred.subscribe(
            move |value| Slot::complete(&fulfilled, Ok(value)),
            move |reason| Slot::complete(&rejected, Err(reason)),
        );
        Self { slot }
    }
}

impl<T, E> Debug for Waiter<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiter")
            .field("ready", &self.slot.borrow().value.is_some())
            .finish()
    }
}

impl<T, E> Future for Waiter<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.slot.borrow_mut();
        match slot.value.take() {
            Some(value) => Poll::Ready(value),
            None => {
                slot.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}
