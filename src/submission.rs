//! Submission state machine: validate, snapshot, dispatch, settle.
//!
//! `Idle → Validating → Submitting → Succeeded | Failed → Idle`. The
//! controller only reads the registry; the request it builds owns its data,
//! so slot changes after `begin` never reach an in-flight submission.

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    api::detect::{DetectError, DetectionClient, dispatch},
    config::Config,
    slots::{SlotFile, SlotRegistry},
    view::UploadSlotView,
};

/// Where the controller is in one submission cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmitState {
    Idle,
    Validating,
    /// A request is in flight; further submits are ignored.
    Submitting { ticket: Uuid },
    Succeeded,
    Failed,
}

/// User-correctable problems found before anything is sent.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("brand name required")]
    BrandRequired,
    #[error("brand name too short")]
    BrandTooShort,
    #[error("missing required image: {0}")]
    MissingImage(String),
    /// No slot is filled and none is required.
    #[error("at least one image required")]
    NoImages,
    #[error("file too large: {0}")]
    FileTooLarge(String),
    #[error("invalid file type: {0}")]
    InvalidFileType(String),
}

/// Parsed detection result.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionReport {
    pub is_fake: bool,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub message: String,
    pub processing_time_secs: f64,
}

/// Result of one submission attempt, consumed once by the UI.
#[derive(Clone, Debug, PartialEq)]
pub enum SubmissionOutcome {
    Success(DetectionReport),
    Failure { reason: String },
}

// Accessors for headless callers; the TUI matches on the variants directly.
impl SubmissionOutcome {
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn report(&self) -> Option<&DetectionReport> {
        match self {
            Self::Success(r) => Some(r),
            Self::Failure { .. } => None,
        }
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Self::Failure { reason } => Some(reason),
            Self::Success(_) => None,
        }
    }
}

/// Validated, immutable payload for one detection call.
#[derive(Clone, Debug)]
pub struct SubmissionRequest {
    brand_name: String,
    images: Vec<(String, SlotFile)>,
}

impl SubmissionRequest {
    pub fn brand_name(&self) -> &str {
        &self.brand_name
    }

    /// `(slot name, file)` in slot declaration order.
    pub fn images(&self) -> &[(String, SlotFile)] {
        &self.images
    }
}

/// Gatekeeper for submissions from one form.
#[derive(Debug)]
pub struct SubmissionController {
    state: SubmitState,
    max_file_bytes: u64,
    min_brand_len: usize,
}

impl SubmissionController {
    pub fn new(max_file_bytes: u64, min_brand_len: usize) -> Self {
        Self {
            state: SubmitState::Idle,
            max_file_bytes,
            min_brand_len,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.limits.max_file_bytes, cfg.form.min_brand_len)
    }

    pub fn state(&self) -> &SubmitState {
        &self.state
    }

    pub fn is_submitting(&self) -> bool {
        matches!(self.state, SubmitState::Submitting { .. })
    }

    /// Validate and snapshot. `Ok(None)` means a submission is already in
    /// flight and this call did nothing.
    pub fn begin<V: UploadSlotView>(
        &mut self,
        brand_raw: &str,
        registry: &SlotRegistry<V>,
    ) -> Result<Option<(Uuid, SubmissionRequest)>, ValidationError> {
        if self.is_submitting() {
            tracing::debug!("submit ignored: request in flight");
            return Ok(None);
        }

        self.state = SubmitState::Validating;
        match self.validate(brand_raw, registry) {
            Ok(request) => {
                let ticket = Uuid::new_v4();
                tracing::info!(
                    "submission {ticket} started with {} images",
                    request.images.len()
                );
                self.state = SubmitState::Submitting { ticket };
                Ok(Some((ticket, request)))
            }
            Err(e) => {
                tracing::info!("submission rejected: {e}");
                self.state = SubmitState::Idle;
                Err(e)
            }
        }
    }

    fn validate<V: UploadSlotView>(
        &self,
        brand_raw: &str,
        registry: &SlotRegistry<V>,
    ) -> Result<SubmissionRequest, ValidationError> {
        let brand = brand_raw.trim();
        if brand.is_empty() {
            return Err(ValidationError::BrandRequired);
        }
        // UTF-16 code units, like a browser's `String.length`.
        if brand.encode_utf16().count() < self.min_brand_len {
            return Err(ValidationError::BrandTooShort);
        }

        if let Some(missing) = registry.first_missing_required() {
            return Err(ValidationError::MissingImage(missing.to_string()));
        }

        let images = registry.snapshot();
        if images.is_empty() {
            return Err(ValidationError::NoImages);
        }
        for (slot, file) in &images {
            if !file.is_image() {
                return Err(ValidationError::InvalidFileType(slot.clone()));
            }
            if file.size() > self.max_file_bytes {
                return Err(ValidationError::FileTooLarge(slot.clone()));
            }
        }

        Ok(SubmissionRequest {
            brand_name: brand.to_string(),
            images,
        })
    }

    /// Settle the in-flight submission. Results for any other ticket are
    /// ignored and yield `None`.
    pub fn complete(
        &mut self,
        ticket: Uuid,
        result: Result<DetectionReport, DetectError>,
    ) -> Option<SubmissionOutcome> {
        if self.state != (SubmitState::Submitting { ticket }) {
            tracing::warn!("stale completion for {ticket} ignored");
            return None;
        }

        let outcome = match result {
            Ok(report) => {
                tracing::info!(
                    "submission {ticket} done: fake={} confidence={:.3}",
                    report.is_fake,
                    report.confidence
                );
                self.state = SubmitState::Succeeded;
                SubmissionOutcome::Success(report)
            }
            Err(e) => {
                tracing::error!("submission {ticket} failed: {e}");
                self.state = SubmitState::Failed;
                SubmissionOutcome::Failure {
                    reason: e.user_message(),
                }
            }
        };
        Some(outcome)
    }

    /// Feedback was shown; go back to `Idle`.
    pub fn acknowledge(&mut self) {
        if matches!(self.state, SubmitState::Succeeded | SubmitState::Failed) {
            self.state = SubmitState::Idle;
        }
    }

    /// `begin`, dispatch with `timeout`, `complete` in one call. The TUI runs
    /// the same steps split across the worker channel, so only headless
    /// callers use this.
    #[cfg_attr(not(test), allow(dead_code))]
    pub async fn submit<V, C>(
        &mut self,
        brand_raw: &str,
        registry: &SlotRegistry<V>,
        client: &C,
        timeout: Duration,
    ) -> Result<Option<SubmissionOutcome>, ValidationError>
    where
        V: UploadSlotView,
        C: DetectionClient + ?Sized,
    {
        let Some((ticket, request)) = self.begin(brand_raw, registry)? else {
            return Ok(None);
        };
        let result = dispatch(client, &request, timeout).await;
        Ok(self.complete(ticket, result))
    }
}
