//! Control endpoint routing.
//!
//! A USB driver hands HID class GET_REPORT/SET_REPORT requests to the
//! [`ControlDispatcher`], which answers feature reports from the
//! [`FeatureConfiguration`] and the [`AuthEngine`].

use std::sync::Arc;

use tracing::{debug, info_span, Span};

use crate::auth::{AuthEngine, AuthError};
use crate::report::{FeatureConfiguration, ReportType};

/// HID report type carried in the high byte of `wValue`.
pub const HID_REPORT_TYPE_INPUT: u8 = 0x01;
pub const HID_REPORT_TYPE_OUTPUT: u8 = 0x02;
pub const HID_REPORT_TYPE_FEATURE: u8 = 0x03;

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("Unsupported {direction} for report 0x{report_id:02x} of type 0x{report_type:02x}")]
    Unsupported {
        direction: &'static str,
        report_type: u8,
        report_id: u8,
    },

    #[error("Auth request failed: {0}")]
    Auth(#[from] AuthError),
}

/// Split a control request's `wValue` into (report type, report id).
pub fn split_w_value(value: u16) -> (u8, u8) {
    ((value >> 8) as u8, (value & 0xff) as u8)
}

pub struct ControlDispatcher {
    auth: Arc<AuthEngine>,
    features: FeatureConfiguration,
    span: Span,
}

impl ControlDispatcher {
    pub fn new(auth: Arc<AuthEngine>, features: FeatureConfiguration) -> Self {
        Self {
            auth,
            features,
            span: info_span!("control"),
        }
    }

    pub fn features(&self) -> &FeatureConfiguration {
        &self.features
    }

    pub fn auth(&self) -> &Arc<AuthEngine> {
        &self.auth
    }

    /// Answer a GET_REPORT request.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Unsupported`] for anything but the feature
    /// configuration and the three readable auth reports.
    pub fn get_report(&self, report_type: u8, report_id: u8) -> Result<Vec<u8>, ControlError> {
        let _entered = self.span.enter();
        let unsupported = ControlError::Unsupported {
            direction: "GET_REPORT",
            report_type,
            report_id,
        };
        if report_type != HID_REPORT_TYPE_FEATURE {
            return Err(unsupported);
        }

        let bytes = match ReportType::try_from(report_id) {
            Ok(ReportType::FeatureConfiguration) => self.features.to_bytes().to_vec(),
            Ok(ReportType::GetResponse) => self.auth.response_report().to_vec(),
            Ok(ReportType::GetAuthStatus) => self.auth.status_report().to_vec(),
            Ok(ReportType::GetAuthPageSize) => self.auth.page_size_report().to_vec(),
            _ => return Err(unsupported),
        };
        debug!(report_id, len = bytes.len(), "GET_REPORT answered");
        Ok(bytes)
    }

    /// Accept a SET_REPORT request.
    ///
    /// Non-feature reports are not handled here and are dropped.
    ///
    /// # Errors
    ///
    /// * [`ControlError::Unsupported`] - feature report other than the challenge
    /// * [`ControlError::Auth`] - the challenge page was rejected
    pub fn set_report(
        &self,
        report_type: u8,
        report_id: u8,
        data: &[u8],
    ) -> Result<(), ControlError> {
        let _entered = self.span.enter();
        if report_type != HID_REPORT_TYPE_FEATURE {
            debug!(report_type, report_id, "Ignoring non-feature SET_REPORT");
            return Ok(());
        }

        match ReportType::try_from(report_id) {
            Ok(ReportType::SetChallenge) => {
                self.auth.set_challenge(data)?;
                Ok(())
            }
            _ => Err(ControlError::Unsupported {
                direction: "SET_REPORT",
                report_type,
                report_id,
            }),
        }
    }
}
