use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug, Display};
use std::future::IntoFuture;
use std::rc::Rc;

use crate::config::UnhandledRejections;
use crate::report::UnhandledRejection;
use crate::runtime;
use crate::waiter::Waiter;

type Callback<V> = Box<dyn FnOnce(V)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Pending,
    Fulfilled,
    Rejected,
}

impl Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Fulfilled => "fulfilled",
            Self::Rejected => "rejected",
        })
    }
}

/// What a deferred value gets settled with.
pub enum Outcome<T, E> {
    Fulfill(T),
    /// Follow another deferred value and take on its eventual state.
    Adopt(Deferred<T, E>),
    Reject(E),
}

impl<T, E> Debug for Outcome<T, E>
where
    T: Debug,
    E: Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fulfill(value) => f.debug_tuple("Fulfill").field(value).finish(),
            Self::Adopt(other) => f.debug_tuple("Adopt").field(&other.id()).finish(),
            Self::Reject(reason) => f.debug_tuple("Reject").field(reason).finish(),
        }
    }
}

/// Anything a handler may return: `Ok` fulfills, `Err` rejects and a
/// [`Deferred`] is adopted.
pub trait IntoOutcome {
    type Value;
    type Error;

    fn into_outcome(self) -> Outcome<Self::Value, Self::Error>;
}

impl<T, E> IntoOutcome for Outcome<T, E> {
    type Value = T;
    type Error = E;

    fn into_outcome(self) -> Outcome<T, E> {
        self
    }
}

impl<T, E> IntoOutcome for Result<T, E> {
    type Value = T;
    type Error = E;

    fn into_outcome(self) -> Outcome<T, E> {
        match self {
            Ok(value) => Outcome::Fulfill(value),
            Err(reason) => Outcome::Reject(reason),
        }
    }
}

impl<T, E> IntoOutcome for Deferred<T, E> {
    type Value = T;
    type Error = E;

    fn into_outcome(self) -> Outcome<T, E> {
        Outcome::Adopt(self)
    }
}

enum State<T, E> {
    Pending,
    Fulfilled(T),
    Rejected(E),
}

struct Inner<T, E> {
    id: u64,
    state: State<T, E>,
    on_fulfilled: Vec<Callback<T>>,
    on_rejected: Vec<Callback<E>>,
    /// A rejection callback was registered at some point.
    handled: bool,
}

/// The eventual result of an operation.
///
/// Clones share the same state machine. Once it leaves pending it never
/// changes again.
///
/// # Examples
///
/// ```
/// use deferred_value::{runtime, Deferred};
///
/// let parsed = Deferred::<&str, String>::resolve("12")
///     .and_then(|text| text.parse::<i32>().map_err(|err| err.to_string()))
///     .catch(|_| Ok(0));
/// assert_eq!(runtime::block_on(parsed).unwrap(), Ok(12));
/// ```
pub struct Deferred<T, E> {
    inner: Rc<RefCell<Inner<T, E>>>,
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T, E> Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("id", &self.id())
            .field("status", &self.status())
            .finish()
    }
}

/// Permission to settle one [`Deferred`].
///
/// Every call only queues the effect; whichever queued effect runs first
/// while the value is still pending wins.
pub struct Resolver<T, E> {
    target: Deferred<T, E>,
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
        }
    }
}

impl<T, E> Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("target", &self.target)
            .finish()
    }
}

impl<T, E> Deferred<T, E> {
    pub fn id(&self) -> u64 {
        self.inner.borrow().id
    }

    pub fn status(&self) -> Status {
        match self.inner.borrow().state {
            State::Pending => Status::Pending,
            State::Fulfilled(_) => Status::Fulfilled,
            State::Rejected(_) => Status::Rejected,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status() == Status::Pending
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T, E> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + Debug + 'static,
{
    /// Creates a pending value and runs `init` right away with its
    /// resolver. Returning `Err` is the same as rejecting with it.
    pub fn new<F>(init: F) -> Self
    where
        F: FnOnce(Resolver<T, E>) -> Result<(), E>,
    {
        let deferred = Self::unsettled();
        let resolver = deferred.resolver();
        if let Err(reason) = init(resolver.clone()) {
            resolver.reject(reason);
        }
        deferred
    }

    /// A pending value together with the capability to settle it.
    pub fn with_resolver() -> (Resolver<T, E>, Self) {
        let deferred = Self::unsettled();
        (deferred.resolver(), deferred)
    }

    pub fn resolve(value: T) -> Self {
        Self::resolve_with(Outcome::Fulfill(value))
    }

    pub fn reject(reason: E) -> Self {
        Self::resolve_with(Outcome::Reject(reason))
    }

    /// Settles through the regular path; a [`Deferred`] gets adopted.
    pub fn resolve_with<O>(outcome: O) -> Self
    where
        O: IntoOutcome<Value = T, Error = E>,
    {
        Self::new(move |resolver| {
            resolver.settle(outcome);
            Ok(())
        })
    }

    fn unsettled() -> Self {
        let id = runtime::next_id();
        log::trace!("deferred #{id} created");
        Self {
            inner: Rc::new(RefCell::new(Inner {
                id,
                state: State::Pending,
                on_fulfilled: Vec::new(),
                on_rejected: Vec::new(),
                handled: false,
            })),
        }
    }

    fn resolver(&self) -> Resolver<T, E> {
        Resolver {
            target: self.clone(),
        }
    }

    /// The settled result, or `None` while pending.
    pub fn result(&self) -> Option<Result<T, E>> {
        match &self.inner.borrow().state {
            State::Pending => None,
            State::Fulfilled(value) => Some(Ok(value.clone())),
            State::Rejected(reason) => Some(Err(reason.clone())),
        }
    }

    pub fn then<U, F, A, R, B>(&self, on_fulfilled: F, on_rejected: R) -> Deferred<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> A + 'static,
        A: IntoOutcome<Value = U, Error = E>,
        R: FnOnce(E) -> B + 'static,
        B: IntoOutcome<Value = U, Error = E>,
    {
        self.chain(
            move |value| on_fulfilled(value).into_outcome(),
            move |reason| on_rejected(reason).into_outcome(),
        )
    }

    /// `then` without a rejection handler: rejections pass through.
    pub fn and_then<U, F, A>(&self, on_fulfilled: F) -> Deferred<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> A + 'static,
        A: IntoOutcome<Value = U, Error = E>,
    {
        self.chain(move |value| on_fulfilled(value).into_outcome(), Outcome::Reject)
    }

    pub fn map<U, F>(&self, f: F) -> Deferred<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> U + 'static,
    {
        self.chain(move |value| Outcome::Fulfill(f(value)), Outcome::Reject)
    }

    /// `then` without a fulfillment handler: values pass through.
    pub fn catch<F, A>(&self, on_rejected: F) -> Deferred<T, E>
    where
        F: FnOnce(E) -> A + 'static,
        A: IntoOutcome<Value = T, Error = E>,
    {
        self.chain(Outcome::Fulfill, move |reason| on_rejected(reason).into_outcome())
    }

    /// Runs `on_finally` on either outcome and passes the original value or
    /// reason on, unless `on_finally` itself fails.
    pub fn finally<F>(&self, on_finally: F) -> Deferred<T, E>
    where
        F: FnOnce() -> Result<(), E> + 'static,
    {
        let on_fulfilled = Rc::new(Cell::new(Some(on_finally)));
        let on_rejected = Rc::clone(&on_fulfilled);
        self.chain(
            move |value| match run_once(&on_fulfilled) {
                Ok(()) => Outcome::Fulfill(value),
                Err(reason) => Outcome::Reject(reason),
            },
            move |reason| match run_once(&on_rejected) {
                Ok(()) => Outcome::Reject(reason),
                Err(replaced) => Outcome::Reject(replaced),
            },
        )
    }

    /// A [`std::future::Future`] resolving to the settled result.
    pub fn waiter(&self) -> Waiter<T, E> {
        Waiter::new(self)
    }

    fn chain<U, F, R>(&self, on_fulfilled: F, on_rejected: R) -> Deferred<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Outcome<U, E> + 'static,
        R: FnOnce(E) -> Outcome<U, E> + 'static,
    {
        let source = self.clone();
        Deferred::new(move |resolver| {
            let rejecting = resolver.clone();
            source.subscribe(
                move |value| resolver.follow(on_fulfilled(value)),
                move |reason| rejecting.follow(on_rejected(reason)),
            );
            Ok(())
        })
    }

    /// Registers raw callbacks. On an already settled value the flush is
    /// queued, so neither callback runs inside this call.
    pub(crate) fn subscribe<F, R>(&self, on_fulfilled: F, on_rejected: R)
    where
        F: FnOnce(T) + 'static,
        R: FnOnce(E) + 'static,
    {
        let settled = {
            let mut inner = self.inner.borrow_mut();
            inner.on_fulfilled.push(Box::new(on_fulfilled));
            inner.on_rejected.push(Box::new(on_rejected));
            inner.handled = true;
            !matches!(inner.state, State::Pending)
        };
        if settled {
            let this = self.clone();
            runtime::queue_microtask(move || this.flush());
        }
    }

    fn flush(&self) {
        let Some(result) = self.result() else {
            return;
        };
        let (fulfilled, rejected) = {
            let mut inner = self.inner.borrow_mut();
            (
                std::mem::take(&mut inner.on_fulfilled),
                std::mem::take(&mut inner.on_rejected),
            )
        };
        match result {
            Ok(value) => fulfilled.into_iter().for_each(|cb| cb(value.clone())),
            Err(reason) => rejected.into_iter().for_each(|cb| cb(reason.clone())),
        }
    }

    /// The queued effect of a [`Resolver`] call.
    fn apply(&self, outcome: Outcome<T, E>) {
        if !self.is_pending() {
            log::trace!("deferred #{} already settled, ignoring", self.id());
            return;
        }
        match outcome {
            Outcome::Fulfill(value) => self.fulfill(value),
            Outcome::Reject(reason) => self.reject_now(reason),
            Outcome::Adopt(other) => self.adopt(other),
        }
    }

    fn adopt(&self, other: Deferred<T, E>) {
        if self.ptr_eq(&other) {
            log::warn!("deferred #{} cannot adopt itself, it stays pending", self.id());
            return;
        }
        log::debug!("deferred #{} adopting #{}", self.id(), other.id());
        let resolver = self.resolver();
        resolver.follow(Outcome::Adopt(other));
    }

    fn fulfill(&self, value: T) {
        let callbacks = {
            let mut inner = self.inner.borrow_mut();
            inner.state = State::Fulfilled(value.clone());
            inner.on_rejected.clear();
            std::mem::take(&mut inner.on_fulfilled)
        };
        log::trace!("deferred #{} fulfilled", self.id());
        for cb in callbacks {
            cb(value.clone());
        }
    }

    fn reject_now(&self, reason: E) {
        let callbacks = {
            let mut inner = self.inner.borrow_mut();
            inner.state = State::Rejected(reason.clone());
            inner.on_fulfilled.clear();
            std::mem::take(&mut inner.on_rejected)
        };
        log::trace!("deferred #{} rejected with {reason:?}", self.id());
        if callbacks.is_empty() {
            self.unhandled(&reason);
        }
        for cb in callbacks {
            cb(reason.clone());
        }
    }

    fn unhandled(&self, reason: &E) {
        match runtime::config().unhandled_rejections {
            UnhandledRejections::AtSettlement => {
                runtime::report(UnhandledRejection::new(self.id(), reason.clone()));
            }
            UnhandledRejections::AfterDrain => {
                let this = self.clone();
                runtime::after_drain(move || {
                    if this.inner.borrow().handled {
                        return;
                    }
                    if let Some(Err(reason)) = this.result() {
                        runtime::report(UnhandledRejection::new(this.id(), reason));
                    }
                });
            }
            UnhandledRejections::Ignore => {}
        }
    }
}

fn run_once<F, E>(slot: &Cell<Option<F>>) -> Result<(), E>
where
    F: FnOnce() -> Result<(), E>,
{
    slot.take().map_or(Ok(()), |f| f())
}

impl<T, E> Resolver<T, E>
where
    T: Clone + 'static,
    E: Clone + Debug + 'static,
{
    pub fn resolve(&self, value: T) {
        self.settle(Outcome::Fulfill(value));
    }

    pub fn reject(&self, reason: E) {
        self.settle(Outcome::Reject(reason));
    }

    /// Settle with whatever `other` eventually settles with.
    ///
    /// Adopting the target itself is caught and leaves it pending. A longer
    /// cycle (A adopts B, B adopts A) is not detected: both stay pending and
    /// the callbacks they hold on each other are never freed.
    pub fn adopt(&self, other: Deferred<T, E>) {
        self.settle(Outcome::Adopt(other));
    }

    pub fn settle<O>(&self, outcome: O)
    where
        O: IntoOutcome<Value = T, Error = E>,
    {
        let target = self.target.clone();
        let outcome = outcome.into_outcome();
        runtime::queue_microtask(move || target.apply(outcome));
    }

    /// Like [`Resolver::settle`], but a [`Deferred`] is subscribed to right
    /// away instead of through a queued effect.
    fn follow(&self, outcome: Outcome<T, E>) {
        match outcome {
            Outcome::Adopt(other) => {
                let resolving = self.clone();
                let rejecting = self.clone();
                other.subscribe(
                    move |value| resolving.resolve(value),
                    move |reason| rejecting.reject(reason),
                );
            }
            settled => self.settle(settled),
        }
    }
}

impl<T, E> IntoFuture for Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + Debug + 'static,
{
    type Output = Result<T, E>;
    type IntoFuture = Waiter<T, E>;

    fn into_future(self) -> Self::IntoFuture {
        self.waiter()
    }
}
