//! Reporting of rejections that settle with nobody listening.
use std::any::Any;
use std::fmt::{self, Debug};

/// What the event loop should do after a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Stop the running loop with [`crate::Error::UncaughtRejection`].
    Fatal,
    /// Carry on.
    Recovered,
}

/// A rejection that settled on a deferred value with no rejection handler.
pub struct UnhandledRejection {
    id: u64,
    reason: String,
    payload: Box<dyn Any>,
}

impl UnhandledRejection {
    pub(crate) fn new<E: Debug + 'static>(id: u64, reason: E) -> Self {
        Self {
            id,
            reason: format!("{reason:?}"),
            payload: Box::new(reason),
        }
    }

    /// Id of the deferred value that rejected.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// `Debug` rendering of the rejection payload.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// The payload itself, if it has type `E`.
    pub fn payload<E: 'static>(&self) -> Option<&E> {
        self.payload.downcast_ref()
    }
}

impl Debug for UnhandledRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnhandledRejection")
            .field("id", &self.id)
            .field("reason", &self.reason)
            .finish()
    }
}

pub trait Reporter {
    fn report(&self, rejection: &UnhandledRejection) -> Disposition;
}

impl<F> Reporter for F
where
    F: Fn(&UnhandledRejection) -> Disposition,
{
    fn report(&self, rejection: &UnhandledRejection) -> Disposition {
        self(rejection)
    }
}

/// The default reporter: log at error level and fail loud.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&self, rejection: &UnhandledRejection) -> Disposition {
        log::error!(
            "uncaught in deferred value #{}: {}",
            rejection.id(),
            rejection.reason()
        );
        Disposition::Fatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_downcasts_to_original_type() {
        let rejection = UnhandledRejection::new(7, String::from("boom"));
        assert_eq!(rejection.id(), 7);
        assert_eq!(rejection.reason(), "\"boom\"");
        assert_eq!(rejection.payload::<String>().map(String::as_str), Some("boom"));
        assert!(rejection.payload::<i32>().is_none());
    }

    #[test]
    fn log_reporter_is_fatal() {
        let rejection = UnhandledRejection::new(1, 42u8);
        assert_eq!(LogReporter.report(&rejection), Disposition::Fatal);
    }

    #[test]
    fn closures_are_reporters() {
        let reporter = |rejection: &UnhandledRejection| {
            assert_eq!(rejection.payload::<u8>(), Some(&3));
            Disposition::Recovered
        };
        assert_eq!(
            reporter.report(&UnhandledRejection::new(2, 3u8)),
            Disposition::Recovered
        );
    }
}
