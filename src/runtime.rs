//! The thread-local event loop every [`crate::Deferred`] is scheduled on.
//!
//! Two task queues: a FIFO microtask queue, and timers on a virtual clock.
//! The microtask queue is always drained completely before the next timer
//! fires. Nothing runs until the loop is driven with [`run`],
//! [`run_microtasks`] or [`block_on`].
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::future::{Future, IntoFuture};
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

use crate::config::Config;
use crate::report::{Disposition, LogReporter, Reporter, UnhandledRejection};
use crate::Error;

type Task = Box<dyn FnOnce()>;

/// Handle to a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

struct Runtime {
    config: Cell<Config>,
    microtasks: RefCell<VecDeque<Task>>,
    drain_hooks: RefCell<Vec<Task>>,
    timers: RefCell<BTreeMap<(Duration, u64), Task>>,
    clock: Cell<Duration>,
    sequence: Cell<u64>,
    reporter: RefCell<Rc<dyn Reporter>>,
    fatal: RefCell<Option<Error>>,
}

impl Runtime {
    fn new(config: Config) -> Self {
        Self {
            config: Cell::new(config),
            microtasks: RefCell::new(VecDeque::new()),
            drain_hooks: RefCell::new(Vec::new()),
            timers: RefCell::new(BTreeMap::new()),
            clock: Cell::new(Duration::ZERO),
            sequence: Cell::new(0),
            reporter: RefCell::new(Rc::new(LogReporter)),
            fatal: RefCell::new(None),
        }
    }

    fn next_sequence(&self) -> u64 {
        let next = self.sequence.get() + 1;
        self.sequence.set(next);
        next
    }
}

thread_local! {
    static RUNTIME: Runtime = Runtime::new(Config::from_env());
}

fn with<R>(f: impl FnOnce(&Runtime) -> R) -> R {
    RUNTIME.with(f)
}

/// Drops all queued work and restores the default configuration, reporter
/// and clock.
pub fn reset() {
    let dropped = with(|rt| {
        rt.config.set(Config::from_env());
        rt.clock.set(Duration::ZERO);
        *rt.reporter.borrow_mut() = Rc::new(LogReporter);
        rt.fatal.borrow_mut().take();
        (
            std::mem::take(&mut *rt.microtasks.borrow_mut()),
            std::mem::take(&mut *rt.drain_hooks.borrow_mut()),
            std::mem::take(&mut *rt.timers.borrow_mut()),
        )
    });
    // Queued closures may own values whose drop touches the loop.
    drop(dropped);
}

pub fn configure(config: Config) {
    with(|rt| rt.config.set(config));
}

pub fn config() -> Config {
    with(|rt| rt.config.get())
}

/// Replaces the unhandled-rejection reporter of this thread's loop.
pub fn set_reporter(reporter: impl Reporter + 'static) {
    let reporter: Rc<dyn Reporter> = Rc::new(reporter);
    with(|rt| *rt.reporter.borrow_mut() = reporter);
}

pub fn queue_microtask(task: impl FnOnce() + 'static) {
    with(|rt| rt.microtasks.borrow_mut().push_back(Box::new(task)));
}

/// Runs `task` once the microtask queue is next empty.
pub(crate) fn after_drain(task: impl FnOnce() + 'static) {
    with(|rt| rt.drain_hooks.borrow_mut().push(Box::new(task)));
}

/// Schedules `task` to run `delay` after the current virtual time.
pub fn set_timeout(delay: Duration, task: impl FnOnce() + 'static) -> TimerId {
    with(|rt| {
        let seq = rt.next_sequence();
        let deadline = rt.clock.get().saturating_add(delay);
        rt.timers.borrow_mut().insert((deadline, seq), Box::new(task));
        TimerId(seq)
    })
}

/// Returns whether the timer was still scheduled.
pub fn clear_timeout(timer: TimerId) -> bool {
    with(|rt| {
        let mut timers = rt.timers.borrow_mut();
        let before = timers.len();
        timers.retain(|&(_, seq), _| seq != timer.0);
        timers.len() != before
    })
}

/// Virtual time elapsed on this thread's loop.
pub fn now() -> Duration {
    with(|rt| rt.clock.get())
}

pub(crate) fn next_id() -> u64 {
    with(Runtime::next_sequence)
}

pub(crate) fn report(rejection: UnhandledRejection) {
    let reporter = with(|rt| rt.reporter.borrow().clone());
    if reporter.report(&rejection) == Disposition::Fatal {
        with(|rt| {
            let mut fatal = rt.fatal.borrow_mut();
            if fatal.is_none() {
                *fatal = Some(Error::UncaughtRejection {
                    id: rejection.id(),
                    reason: rejection.reason().to_owned(),
                });
            }
        });
    }
}

fn take_fatal() -> Result<(), Error> {
    match with(|rt| rt.fatal.borrow_mut().take()) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Drains the microtask queue, including microtasks queued while draining.
/// Returns how many microtasks ran.
pub fn run_microtasks() -> Result<usize, Error> {
    let mut ran = 0;
    loop {
        let next = with(|rt| rt.microtasks.borrow_mut().pop_front());
        match next {
            Some(task) => {
                task();
                ran += 1;
            }
            None => {
                let hooks = with(|rt| std::mem::take(&mut *rt.drain_hooks.borrow_mut()));
                if hooks.is_empty() {
                    break;
                }
                for hook in hooks {
                    hook();
                }
            }
        }
        take_fatal()?;
    }
    Ok(ran)
}

fn fire_next_timer() -> Result<bool, Error> {
    let next = with(|rt| {
        let ((deadline, _), task) = rt.timers.borrow_mut().pop_first()?;
        rt.clock.set(rt.clock.get().max(deadline));
        Some(task)
    });
    let Some(task) = next else {
        return Ok(false);
    };
    task();
    take_fatal()?;
    Ok(true)
}

/// Runs until both queues are empty.
pub fn run() -> Result<(), Error> {
    loop {
        run_microtasks()?;
        if !fire_next_timer()? {
            return Ok(());
        }
    }
}

/// Drives the loop until `future` completes.
///
/// # Examples
///
/// ```
/// use deferred_value::{runtime, Deferred};
/// use std::time::Duration;
///
/// let later = Deferred::<&str, ()>::new(|resolver| {
///     runtime::set_timeout(Duration::from_millis(50), move || resolver.resolve("done"));
///     Ok(())
/// });
/// assert_eq!(runtime::block_on(later).unwrap(), Ok("done"));
/// assert_eq!(runtime::now(), Duration::from_millis(50));
/// ```
pub fn block_on<F: IntoFuture>(future: F) -> Result<F::Output, Error> {
    let mut future = std::pin::pin!(future.into_future());
    let mut cx = Context::from_waker(futures::task::noop_waker_ref());
    loop {
        if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
            return Ok(output);
        }
        if run_microtasks()? == 0 && !fire_next_timer()? {
            return Err(Error::Stalled);
        }
    }
}
