//! Aggregation helpers, built only on [`Deferred::new`] and [`Deferred::then`].
use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::rc::Rc;

use thiserror::Error;

use crate::{Deferred, Resolver, Status};

/// Every input of [`any`] rejected. `errors` keeps input order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("all {count} deferred values were rejected", count = .errors.len())]
pub struct AggregateError<E> {
    pub errors: Vec<E>,
}

/// Per-input outcome reported by [`all_settled`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settled<T, E> {
    Fulfilled(T),
    Rejected(E),
}

impl<T, E> Settled<T, E> {
    pub fn status(&self) -> Status {
        match self {
            Self::Fulfilled(_) => Status::Fulfilled,
            Self::Rejected(_) => Status::Rejected,
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Fulfilled(value) => Some(value),
            Self::Rejected(_) => None,
        }
    }

    pub fn reason(&self) -> Option<&E> {
        match self {
            Self::Fulfilled(_) => None,
            Self::Rejected(reason) => Some(reason),
        }
    }
}

/// Collects one value per input into input order once all have arrived.
struct Slots<V> {
    values: RefCell<Vec<Option<V>>>,
    remaining: Cell<usize>,
}

impl<V> Slots<V> {
    fn new(len: usize) -> Rc<Self> {
        Rc::new(Self {
            values: RefCell::new((0..len).map(|_| None).collect()),
            remaining: Cell::new(len),
        })
    }

    /// Stores `value` and hands back everything once the last slot fills.
    fn fill(&self, index: usize, value: V) -> Option<Vec<V>> {
        let mut values = self.values.borrow_mut();
        if values[index].replace(value).is_none() {
            self.remaining.set(self.remaining.get() - 1);
        }
        if self.remaining.get() > 0 {
            return None;
        }
        Some(values.drain(..).flatten().collect())
    }
}

/// Settles like whichever input settles first.
///
/// An empty input never settles.
pub fn race<T, E, I>(deferreds: I) -> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + Debug + 'static,
    I: IntoIterator<Item = Deferred<T, E>>,
{
    Deferred::new(move |resolver: Resolver<T, E>| {
        for deferred in deferreds {
            let resolving = resolver.clone();
            let rejecting = resolver.clone();
            deferred.then(
                move |value| {
                    resolving.resolve(value);
                    Ok::<_, E>(())
                },
                move |reason| {
                    rejecting.reject(reason);
                    Ok::<_, E>(())
                },
            );
        }
        Ok(())
    })
}

/// Fulfills with every value in input order, or rejects with the first
/// rejection.
///
/// # Examples
///
/// ```
/// use deferred_value::{all, runtime, Deferred};
///
/// let sum = all([Deferred::<i32, ()>::resolve(1), Deferred::resolve(2)])
///     .map(|values| values.iter().sum::<i32>());
/// assert_eq!(runtime::block_on(sum).unwrap(), Ok(3));
/// ```
pub fn all<T, E, I>(deferreds: I) -> Deferred<Vec<T>, E>
where
    T: Clone + 'static,
    E: Clone + Debug + 'static,
    I: IntoIterator<Item = Deferred<T, E>>,
{
    let deferreds: Vec<_> = deferreds.into_iter().collect();
    Deferred::new(move |resolver: Resolver<Vec<T>, E>| {
        if deferreds.is_empty() {
            resolver.resolve(Vec::new());
            return Ok(());
        }
        let slots = Slots::new(deferreds.len());
        for (index, deferred) in deferreds.into_iter().enumerate() {
            let slots = Rc::clone(&slots);
            let resolving = resolver.clone();
            let rejecting = resolver.clone();
            deferred.then(
                move |value| {
                    if let Some(values) = slots.fill(index, value) {
                        resolving.resolve(values);
                    }
                    Ok::<_, E>(())
                },
                move |reason| {
                    rejecting.reject(reason);
                    Ok::<_, E>(())
                },
            );
        }
        Ok(())
    })
}

/// Fulfills with the first fulfillment. Rejects only once every input has
/// rejected; an empty input rejects right away.
pub fn any<T, E, I>(deferreds: I) -> Deferred<T, AggregateError<E>>
where
    T: Clone + 'static,
    E: Clone + Debug + 'static,
    I: IntoIterator<Item = Deferred<T, E>>,
{
    let deferreds: Vec<_> = deferreds.into_iter().collect();
    Deferred::new(move |resolver: Resolver<T, AggregateError<E>>| {
        if deferreds.is_empty() {
            resolver.reject(AggregateError { errors: Vec::new() });
            return Ok(());
        }
        let slots = Slots::new(deferreds.len());
        for (index, deferred) in deferreds.into_iter().enumerate() {
            let slots = Rc::clone(&slots);
            let resolving = resolver.clone();
            let rejecting = resolver.clone();
            deferred.then(
                move |value| {
                    resolving.resolve(value);
                    Ok::<_, E>(())
                },
                move |reason| {
                    if let Some(errors) = slots.fill(index, reason) {
                        rejecting.reject(AggregateError { errors });
                    }
                    Ok::<_, E>(())
                },
            );
        }
        Ok(())
    })
}

/// Fulfills once every input has settled, with one [`Settled`] per input in
/// input order. Never rejects.
pub fn all_settled<T, E, I>(deferreds: I) -> Deferred<Vec<Settled<T, E>>, E>
where
    T: Clone + 'static,
    E: Clone + Debug + 'static,
    I: IntoIterator<Item = Deferred<T, E>>,
{
    let deferreds: Vec<_> = deferreds.into_iter().collect();
    Deferred::new(move |resolver: Resolver<Vec<Settled<T, E>>, E>| {
        if deferreds.is_empty() {
            resolver.resolve(Vec::new());
            return Ok(());
        }
        let slots = Slots::new(deferreds.len());
        for (index, deferred) in deferreds.into_iter().enumerate() {
            let fulfilled = Rc::clone(&slots);
            let rejected = Rc::clone(&slots);
            let resolving = resolver.clone();
            let also_resolving = resolver.clone();
            deferred.then(
                move |value| {
                    if let Some(outcomes) = fulfilled.fill(index, Settled::Fulfilled(value)) {
                        resolving.resolve(outcomes);
                    }
                    Ok::<_, E>(())
                },
                move |reason| {
                    if let Some(outcomes) = rejected.fill(index, Settled::Rejected(reason)) {
                        also_resolving.resolve(outcomes);
                    }
                    Ok::<_, E>(())
                },
            );
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime;
    use std::time::Duration;

    fn after<T>(ms: u64, value: T) -> Deferred<T, String>
    where
        T: Clone + 'static,
    {
        Deferred::new(move |resolver| {
            runtime::set_timeout(Duration::from_millis(ms), move || resolver.resolve(value));
            Ok(())
        })
    }

    fn fail_after<T>(ms: u64, reason: &str) -> Deferred<T, String>
    where
        T: Clone + 'static,
    {
        let reason = reason.to_owned();
        Deferred::new(move |resolver| {
            runtime::set_timeout(Duration::from_millis(ms), move || resolver.reject(reason));
            Ok(())
        })
    }

    #[test]
    fn slots_fill_in_input_order() {
        let slots = Slots::new(3);
        assert_eq!(slots.fill(2, 'c'), None);
        assert_eq!(slots.fill(0, 'a'), None);
        assert_eq!(slots.fill(1, 'b'), Some(vec!['a', 'b', 'c']));
    }

    #[test]
    fn race_ignores_later_rejection() {
        let winner = race([after(5, 1), fail_after(10, "too slow")]);
        runtime::run().unwrap();
        assert_eq!(winner.result(), Some(Ok(1)));
    }

    #[test]
    fn race_takes_first_rejection() {
        let loser = race([after(10, 1), fail_after(5, "quick failure")]);
        assert_eq!(
            runtime::block_on(loser).unwrap(),
            Err("quick failure".to_owned())
        );
    }

    #[test]
    fn race_of_nothing_stays_pending() {
        let never = race(Vec::<Deferred<i32, String>>::new());
        runtime::run().unwrap();
        assert!(never.is_pending());
    }

    #[test]
    fn all_rejects_with_first_rejection_in_time() {
        let failed = all([after(1, 1), fail_after(20, "late"), fail_after(10, "early")]);
        assert_eq!(runtime::block_on(failed).unwrap(), Err("early".to_owned()));
    }

    #[test]
    fn any_takes_first_fulfillment() {
        let first = any([fail_after(1, "nope"), after(10, "slow"), after(5, "fast")]);
        assert_eq!(runtime::block_on(first).unwrap(), Ok("fast"));
    }

    #[test]
    fn any_aggregates_rejections_in_input_order() {
        let none = any([fail_after::<i32>(20, "a"), fail_after(10, "b")]);
        let err = runtime::block_on(none).unwrap().unwrap_err();
        assert_eq!(err.errors, ["a", "b"]);
        assert_eq!(err.to_string(), "all 2 deferred values were rejected");
    }

    #[test]
    fn any_of_nothing_rejects() {
        let none = any(Vec::<Deferred<i32, String>>::new());
        let err = runtime::block_on(none).unwrap().unwrap_err();
        assert!(err.errors.is_empty());
    }

    #[test]
    fn all_settled_reports_every_outcome() {
        let settled = all_settled([after(10, 1), fail_after(5, "bad"), after(1, 3)]);
        let outcomes = runtime::block_on(settled).unwrap().unwrap();
        assert_eq!(
            outcomes,
            [
                Settled::Fulfilled(1),
                Settled::Rejected("bad".to_owned()),
                Settled::Fulfilled(3),
            ]
        );
        assert_eq!(outcomes[1].status(), Status::Rejected);
        assert_eq!(outcomes[1].reason().map(String::as_str), Some("bad"));
        assert_eq!(outcomes[0].value(), Some(&1));
    }

    #[test]
    fn all_settled_of_nothing_is_empty() {
        let settled = all_settled(Vec::<Deferred<i32, String>>::new());
        assert_eq!(runtime::block_on(settled).unwrap(), Ok(Vec::new()));
    }
}
