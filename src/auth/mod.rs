//! Auth Engine - paged challenge/response handshake
//!
//! The host uploads a 256-byte nonce in [`AuthReport`] pages, polls the
//! status until the signature is ready, then downloads a 0x410-byte response
//! page by page. Signing is slow compared to the control path, so it runs on
//! a small dedicated worker pool while status polls keep answering "pending".
//!

mod key;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, error, info, info_span, warn, Span};

use crate::report::{
    AuthPageSizeReport, AuthReport, AuthStatusReport, CodecError, ReportType, AUTH_PAYLOAD_SIZE,
};

pub use key::{
    KeyError, KeyMaterial, IDENTITY_SIZE, KEY_FILE_SIZE, RESPONSE_SIZE, SIGNED_IDENTITY_SIZE,
};

/// Size of the nonce the host uploads.
pub const CHALLENGE_SIZE: usize = 0x100;

/// Produces the full response (signature followed by signed identity) for a nonce
///
/// Implemented by [`KeyMaterial`]. Tests substitute their own signers to
/// exercise the pending and failure paths without RSA.
pub trait ChallengeSigner: Send + Sync + 'static {
    fn sign_challenge(&self, nonce: &[u8]) -> Result<Vec<u8>, AuthError>;
}

/// Status byte reported in [`AuthStatusReport`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AuthStatusCode {
    /// Response is ready to be read
    Ready = 0x00,
    /// Signing in progress
    Pending = 0x01,
    /// No handshake in progress
    Idle = 0x10,
    /// Signing failed
    Failed = 0xff,
}

/// Errors surfaced by the auth engine
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Incoming buffer does not decode as an auth report
    #[error("Malformed auth report: {0}")]
    Codec(#[from] CodecError),

    /// A challenge page arrived with a report id other than 0xf0
    #[error("Unexpected report type 0x{0:02x} for challenge upload")]
    UnexpectedReportType(u8),

    /// Page size outside what one [`AuthReport`] can carry
    #[error("{which} page size {size} is outside 1..={max}")]
    InvalidPageSize {
        which: &'static str,
        size: usize,
        max: usize,
    },

    /// The signer could not produce a response
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Worker pool could not be created
    #[error("Failed to start signing workers: {0}")]
    Runtime(#[source] std::io::Error),
}

#[derive(Debug)]
struct AuthState {
    status: AuthStatusCode,
    seq: u8,
    challenge_page: usize,
    response_page: usize,
    challenge_size: usize,
    response_size: usize,
    challenge_pages: usize,
    response_pages: usize,
    nonce: Vec<u8>,
    response: Vec<u8>,
    response_cursor: usize,
    // Bumped on reset so late signatures from an abandoned handshake are dropped
    session: u64,
}

impl AuthState {
    fn new() -> Self {
        Self {
            status: AuthStatusCode::Idle,
            seq: 0,
            challenge_page: 0,
            response_page: 0,
            challenge_size: AUTH_PAYLOAD_SIZE,
            response_size: AUTH_PAYLOAD_SIZE,
            challenge_pages: CHALLENGE_SIZE.div_ceil(AUTH_PAYLOAD_SIZE),
            response_pages: RESPONSE_SIZE.div_ceil(AUTH_PAYLOAD_SIZE),
            nonce: Vec::with_capacity(CHALLENGE_SIZE),
            response: Vec::with_capacity(RESPONSE_SIZE),
            response_cursor: 0,
            session: 0,
        }
    }

    fn reset(&mut self) {
        self.status = AuthStatusCode::Idle;
        self.challenge_page = 0;
        self.response_page = 0;
        self.nonce.clear();
        self.response.clear();
        self.response_cursor = 0;
        self.session = self.session.wrapping_add(1);
    }
}

/// Settings for the signing worker pool
#[derive(Clone, Debug)]
pub struct AuthSettings {
    /// Blocking threads available for signing
    pub signing_threads: usize,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self { signing_threads: 2 }
    }
}

/// Controller-side state of the authentication handshake
///
/// All methods take `&self` and may be called from any thread; the control
/// endpoint handler typically holds the engine in an [`Arc`].
///
/// # Handshake
///
/// ```text
/// host                      engine
///  │ SET 0xf0 page 0..=4  ─►│ accumulate nonce, last page dispatches signing
///  │ GET 0xf2             ─►│ 0x01 pending ... 0x00 ready
///  │ GET 0xf1 page 0..=18 ─►│ response pages, last read resets
/// ```
///
/// # Resource Management
///
/// The engine owns a tokio runtime for its signing pool. Dropping the engine
/// shuts the pool down without waiting for an in-flight signature.
pub struct AuthEngine {
    signer: Arc<dyn ChallengeSigner>,
    state: Arc<Mutex<AuthState>>,
    runtime: Option<Runtime>,
    span: Span,
}

impl AuthEngine {
    /// Creates an engine with the default worker pool
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Runtime`] if the signing threads cannot be spawned.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use std::sync::Arc;
    /// use opends4::{AuthEngine, KeyMaterial};
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let key = KeyMaterial::load("ds4key.bin")?;
    /// let engine = AuthEngine::new(Arc::new(key))?;
    /// assert_eq!(engine.status_report()[0], 0xf2);
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(signer: Arc<dyn ChallengeSigner>) -> Result<Self, AuthError> {
        Self::with_settings(signer, AuthSettings::default())
    }

    pub fn with_settings(
        signer: Arc<dyn ChallengeSigner>,
        settings: AuthSettings,
    ) -> Result<Self, AuthError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(settings.signing_threads.max(1))
            .thread_name("auth-signer")
            .build()
            .map_err(AuthError::Runtime)?;

        let span = info_span!("auth");
        span.in_scope(|| {
            debug!(
                signing_threads = settings.signing_threads,
                "Auth engine created"
            )
        });

        Ok(Self {
            signer,
            state: Arc::new(Mutex::new(AuthState::new())),
            runtime: Some(runtime),
            span,
        })
    }

    pub fn status(&self) -> AuthStatusCode {
        self.state.lock().status
    }

    /// Accepts one challenge page (SET_REPORT 0xf0)
    ///
    /// Bad CRCs, sequence mismatches and out-of-order pages are logged and the
    /// page is still accepted. Completing the final page flips the status to
    /// pending and hands the nonce to the signing pool.
    ///
    /// # Errors
    ///
    /// * [`AuthError::Codec`] - buffer is not exactly 64 bytes
    /// * [`AuthError::UnexpectedReportType`] - report id is not 0xf0
    pub fn set_challenge(&self, data: &[u8]) -> Result<(), AuthError> {
        let _entered = self.span.enter();
        let page = AuthReport::from_bytes(data)?;
        if !page.crc_valid() {
            warn!(page = page.page, "Invalid CRC32 on challenge page");
        }
        if page.report_type != ReportType::SetChallenge.id() {
            return Err(AuthError::UnexpectedReportType(page.report_type));
        }

        let mut state = self.state.lock();
        if page.page != 0 && page.seq != state.seq {
            warn!(
                expected = state.seq,
                got = page.seq,
                "Inconsistent challenge sequence"
            );
        } else if page.page as usize != state.challenge_page {
            warn!(
                expected = state.challenge_page,
                got = page.page,
                "Out of order challenge write"
            );
        }
        state.seq = page.seq;

        let offset = page.page as usize * state.challenge_size;
        let valid = CHALLENGE_SIZE
            .saturating_sub(offset)
            .min(state.challenge_size);
        state.nonce.extend_from_slice(&page.data[..valid]);
        debug!(page = page.page, bytes = valid, "Challenge page stored");

        if state.challenge_page + 1 == state.challenge_pages {
            state.status = AuthStatusCode::Pending;
            info!(
                seq = state.seq,
                nonce_len = state.nonce.len(),
                "Challenge complete, signing"
            );
            self.dispatch_signing(&mut state);
        }
        state.challenge_page += 1;
        Ok(())
    }

    fn dispatch_signing(&self, state: &mut AuthState) {
        let Some(runtime) = self.runtime.as_ref() else {
            error!("Signing pool is gone, cannot sign challenge");
            state.status = AuthStatusCode::Failed;
            return;
        };
        let nonce = state.nonce.clone();
        let session = state.session;
        let signer = self.signer.clone();
        let shared = self.state.clone();
        let span = self.span.clone();
        runtime.spawn_blocking(move || {
            let _entered = span.enter();
            let result = signer.sign_challenge(&nonce);

            let mut state = shared.lock();
            if state.session != session {
                debug!("Dropping signature for a handshake that was reset");
                return;
            }
            match result {
                Ok(response) => {
                    state.response = response;
                    state.response_cursor = 0;
                    state.status = AuthStatusCode::Ready;
                    info!(bytes = state.response.len(), "Challenge response ready");
                }
                Err(e) => {
                    error!("Challenge signing failed: {}", e);
                    state.status = AuthStatusCode::Failed;
                }
            }
        });
    }

    /// Encodes the current status (GET_REPORT 0xf2)
    pub fn status_report(&self) -> [u8; AuthStatusReport::SIZE] {
        let state = self.state.lock();
        AuthStatusReport::new(state.seq, state.status as u8).to_bytes()
    }

    /// Serves the next response page (GET_REPORT 0xf1)
    ///
    /// The page counter only advances while the response is ready. Reading
    /// the final page resets the handshake; abandoning the read part way
    /// leaves the state as it is until [`AuthEngine::reset`].
    pub fn response_report(&self) -> [u8; AuthReport::SIZE] {
        let _entered = self.span.enter();
        let mut state = self.state.lock();
        let mut page = AuthReport::new(ReportType::GetResponse, state.seq, state.response_page as u8);

        let start = state.response_cursor.min(state.response.len());
        let len = (state.response.len() - start).min(state.response_size);
        if len == 0 {
            warn!(
                page = state.response_page,
                "Attempt to read outside of the auth response buffer"
            );
        }
        page.data[..len].copy_from_slice(&state.response[start..start + len]);
        state.response_cursor = start + len;

        if state.response_page + 1 == state.response_pages {
            debug!("Final response page read, resetting");
            state.reset();
        } else if state.status == AuthStatusCode::Ready {
            state.response_page += 1;
        }

        page.fill_crc();
        page.to_bytes()
    }

    /// Changes the challenge and response page sizes
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidPageSize`] if either size is zero or larger
    /// than [`AUTH_PAYLOAD_SIZE`]. Neither size changes in that case.
    pub fn set_page_sizes(&self, challenge: usize, response: usize) -> Result<(), AuthError> {
        for (which, size) in [("challenge", challenge), ("response", response)] {
            if size == 0 || size > AUTH_PAYLOAD_SIZE {
                return Err(AuthError::InvalidPageSize {
                    which,
                    size,
                    max: AUTH_PAYLOAD_SIZE,
                });
            }
        }
        let mut state = self.state.lock();
        state.challenge_size = challenge;
        state.response_size = response;
        state.challenge_pages = CHALLENGE_SIZE.div_ceil(challenge);
        state.response_pages = RESPONSE_SIZE.div_ceil(response);
        debug!(
            challenge,
            response,
            challenge_pages = state.challenge_pages,
            response_pages = state.response_pages,
            "Auth page sizes changed"
        );
        Ok(())
    }

    /// Encodes the page sizes (GET_REPORT 0xf3)
    pub fn page_size_report(&self) -> [u8; AuthPageSizeReport::SIZE] {
        let state = self.state.lock();
        AuthPageSizeReport::new(state.challenge_size as u8, state.response_size as u8).to_bytes()
    }

    /// Abandons any handshake in progress
    pub fn reset(&self) {
        let _entered = self.span.enter();
        self.state.lock().reset();
        debug!("Auth state reset");
    }
}

impl Drop for AuthEngine {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
