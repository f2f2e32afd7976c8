//! Interrupt endpoint glue.
//!
//! The USB driver owns the endpoints and calls back into the [`ReportPump`]
//! whenever a transfer completes. The pump answers an IN completion with the
//! next input report and forwards OUT data to the tracker as feedback.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, info_span, Span};

use crate::report::InputReport;
use crate::tracker::StateTracker;

/// How a transfer finished, as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Completed,
    /// Endpoint is going away; stop submitting
    Shutdown,
    /// Driver-specific fault code
    Failed(i32),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("{endpoint} transfer failed with status {code}")]
    TransferFailed { endpoint: &'static str, code: i32 },
}

pub struct ReportPump {
    tracker: Arc<StateTracker>,
    stopped: AtomicBool,
    submitted: AtomicU64,
    span: Span,
}

impl ReportPump {
    pub fn new(tracker: Arc<StateTracker>) -> Self {
        let span = info_span!(parent: tracker.span(), "pump");
        Self {
            tracker,
            stopped: AtomicBool::new(false),
            submitted: AtomicU64::new(0),
            span,
        }
    }

    /// The report to prime the IN endpoint with.
    pub fn first_report(&self) -> [u8; InputReport::SIZE] {
        self.next_report()
    }

    fn next_report(&self) -> [u8; InputReport::SIZE] {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        self.tracker.prepare_submission()
    }

    /// Handle an IN completion.
    ///
    /// Returns the next report to submit, or `None` once the endpoint shut
    /// down. Faults are returned and not retried.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::TransferFailed`] for [`TransferStatus::Failed`].
    pub fn on_in_complete(
        &self,
        status: TransferStatus,
    ) -> Result<Option<[u8; InputReport::SIZE]>, TransportError> {
        let _entered = self.span.enter();
        if self.is_stopped() {
            return Ok(None);
        }
        match status {
            TransferStatus::Completed => Ok(Some(self.next_report())),
            TransferStatus::Shutdown => {
                info!(
                    submitted = self.submitted(),
                    "IN endpoint shut down, stopping submissions"
                );
                self.stopped.store(true, Ordering::SeqCst);
                Ok(None)
            }
            TransferStatus::Failed(code) => {
                error!("IN transfer failed with status {}", code);
                Err(TransportError::TransferFailed {
                    endpoint: "IN",
                    code,
                })
            }
        }
    }

    /// Handle an OUT completion carrying `data` from the host.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::TransferFailed`] for [`TransferStatus::Failed`].
    pub fn on_out_complete(
        &self,
        data: &[u8],
        status: TransferStatus,
    ) -> Result<(), TransportError> {
        let _entered = self.span.enter();
        match status {
            TransferStatus::Completed => {
                self.tracker.process_feedback(data);
                Ok(())
            }
            TransferStatus::Shutdown => {
                debug!("OUT endpoint shut down");
                Ok(())
            }
            TransferStatus::Failed(code) => {
                error!("OUT transfer failed with status {}", code);
                Err(TransportError::TransferFailed {
                    endpoint: "OUT",
                    code,
                })
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Reports handed out so far.
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::FeedbackReport;
    use tracing_test::traced_test;

    fn pump() -> (Arc<StateTracker>, ReportPump) {
        let tracker = Arc::new(StateTracker::new());
        let pump = ReportPump::new(tracker.clone());
        (tracker, pump)
    }

    #[test]
    fn completions_advance_the_counter() {
        let (_tracker, pump) = pump();
        let first = InputReport::from_bytes(&pump.first_report()).unwrap();
        let next = pump
            .on_in_complete(TransferStatus::Completed)
            .unwrap()
            .unwrap();
        let next = InputReport::from_bytes(&next).unwrap();
        assert_eq!(next.report_index(), first.report_index() + 1);
        assert_eq!(pump.submitted(), 2);
    }

    #[test]
    #[traced_test]
    fn shutdown_stops_without_error() {
        let (_tracker, pump) = pump();
        pump.first_report();
        assert_eq!(pump.on_in_complete(TransferStatus::Shutdown), Ok(None));
        assert!(pump.is_stopped());
        assert!(logs_contain("stopping submissions"));

        // Late completions after shutdown produce nothing
        assert_eq!(pump.on_in_complete(TransferStatus::Completed), Ok(None));
        assert_eq!(pump.submitted(), 1);
    }

    #[test]
    fn faults_are_surfaced() {
        let (_tracker, pump) = pump();
        assert_eq!(
            pump.on_in_complete(TransferStatus::Failed(-32)),
            Err(TransportError::TransferFailed {
                endpoint: "IN",
                code: -32
            })
        );
        assert!(!pump.is_stopped());
        assert!(pump.on_out_complete(&[], TransferStatus::Failed(-5)).is_err());
    }

    #[test]
    fn out_data_becomes_feedback() {
        let (tracker, pump) = pump();
        let mut feedback = FeedbackReport::default();
        feedback.rumble_left = 0xc0;
        feedback.led_color = [0x10, 0x20, 0x30];
        pump.on_out_complete(&feedback.to_bytes(), TransferStatus::Completed)
            .unwrap();
        assert_eq!(tracker.feedback(), feedback);

        pump.on_out_complete(&[0u8; 4], TransferStatus::Shutdown).unwrap();
        assert_eq!(tracker.feedback(), feedback);
    }
}
