use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::capture::capture_session::{CaptureEnvironment, CaptureSession};
use crate::capture::domain::capture_attempt::CaptureAttempt;
use crate::shared::clip::Clip;
use crate::verification::domain::loan_product::LoanProduct;
use crate::verification::domain::question::Question;
use crate::verification::domain::verification_session::{
    Advance, FlowError, FlowStage, VerificationSession,
};

/// What the intro stage shows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Intro {
    pub title: String,
    pub message: String,
    /// When absent the message is displayed and the applicant continues
    /// explicitly.
    pub clip: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitAction {
    ReturnToDashboard,
    ContinueApplication,
}

/// Hand-off to the surrounding application once verification completes.
/// The accepted clips travel with either exit.
#[derive(Clone, Debug, PartialEq)]
pub struct FlowExit {
    pub action: ExitAction,
    pub product_key: String,
    /// Route of the next application step, for `ContinueApplication`.
    pub next_step: Option<String>,
    pub clips: Vec<Clip>,
}

/// Drives one applicant through `intro → verification → processing →
/// complete` for a loan product.
///
/// Holds at most one capture session; the next question's session is only
/// opened after the previous one has been fully torn down.
///
/// Processing ends on its own: `Complete` is published to subscribers when
/// the processing delay runs out, whether or not `finish_processing` is
/// awaited.
pub struct VerificationFlow {
    env: CaptureEnvironment,
    product: LoanProduct,
    session: VerificationSession,
    capture: Option<CaptureSession>,
    processing_until: Option<Instant>,
    processing_timer: Option<JoinHandle<()>>,
    stage_tx: Arc<watch::Sender<FlowStage>>,
}

impl VerificationFlow {
    pub fn new(env: CaptureEnvironment, product: LoanProduct) -> Result<Self, FlowError> {
        let session = VerificationSession::new(&product.key, product.questions.clone())?;
        let (stage_tx, _) = watch::channel(FlowStage::Intro);
        log::info!(
            "Starting {} verification ({} questions)",
            product.title,
            product.questions.len()
        );
        Ok(Self {
            env,
            product,
            session,
            capture: None,
            processing_until: None,
            processing_timer: None,
            stage_tx: Arc::new(stage_tx),
        })
    }

    pub fn product(&self) -> &LoanProduct {
        &self.product
    }

    pub fn stage(&self) -> FlowStage {
        if self.processing_elapsed() {
            FlowStage::Complete
        } else {
            self.session.stage()
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<FlowStage> {
        self.stage_tx.subscribe()
    }

    pub fn intro(&self) -> Intro {
        Intro {
            title: self.product.title.clone(),
            message: self.product.welcome_message.clone(),
            clip: self.product.intro_clip.clone(),
        }
    }

    pub fn current_question(&self) -> Option<&Question> {
        self.session.current_question()
    }

    /// The live capture session for the current question.
    pub fn capture(&self) -> Option<&CaptureSession> {
        self.capture.as_ref()
    }

    /// The intro clip ended, or the applicant chose to continue. Opens the
    /// first question's capture session.
    pub fn finish_intro(&mut self) -> Result<&CaptureSession, FlowError> {
        self.session.begin_verification()?;
        self.publish();
        let capture = self.open_capture(0);
        Ok(&*self.capture.insert(capture))
    }

    /// Accepts the current question's stopped recording, tears its session
    /// down, then opens the next question or starts processing.
    pub async fn submit_response(&mut self) -> Result<Advance, FlowError> {
        let capture = self.capture.as_ref().ok_or(FlowError::NoActiveCapture)?;
        self.session
            .expect_response(capture.status().question_index)?;
        let attempt = capture.submit().await?;
        let advance = self.session.record_accepted(attempt)?;

        if let Some(capture) = self.capture.take() {
            capture.teardown().await;
        }
        match advance {
            Advance::NextQuestion(index) => {
                self.capture = Some(self.open_capture(index));
            }
            Advance::Processing => {
                let delay = self.env.config.processing_delay();
                log::info!("All responses accepted; processing for {delay:?}");
                let deadline = Instant::now() + delay;
                self.processing_until = Some(deadline);
                self.publish();
                let stage_tx = self.stage_tx.clone();
                self.processing_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep_until(deadline).await;
                    stage_tx.send_replace(FlowStage::Complete);
                }));
            }
        }
        Ok(advance)
    }

    /// Waits out the processing interval and completes the flow.
    pub async fn finish_processing(&mut self) -> Result<(), FlowError> {
        let deadline = match self.processing_until {
            Some(deadline) if self.session.stage() == FlowStage::Processing => deadline,
            _ => {
                return Err(FlowError::WrongStage {
                    action: "finish processing",
                    stage: self.stage(),
                })
            }
        };
        tokio::time::sleep_until(deadline).await;
        self.settle()
    }

    pub fn processing_remaining(&self) -> Option<Duration> {
        self.processing_until
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    fn processing_elapsed(&self) -> bool {
        self.processing_until
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Completes the session once the processing delay has run out.
    fn settle(&mut self) -> Result<(), FlowError> {
        if !self.processing_elapsed() {
            return Ok(());
        }
        self.session.complete()?;
        self.processing_until = None;
        if let Some(timer) = self.processing_timer.take() {
            timer.abort();
        }
        log::info!("{} verification complete", self.product.title);
        self.publish();
        Ok(())
    }

    /// Accepted attempts so far, in question order.
    pub fn attempts(&self) -> Vec<CaptureAttempt> {
        self.session.attempts().cloned().collect()
    }

    /// The accepted clips in question order, once complete.
    pub fn accepted_clips(&mut self) -> Result<Vec<Clip>, FlowError> {
        self.settle()?;
        self.session.accepted_clips()
    }

    pub fn exit(mut self, action: ExitAction) -> Result<FlowExit, FlowError> {
        self.settle()?;
        let clips = self.session.accepted_clips()?;
        let next_step = match action {
            ExitAction::ContinueApplication => Some(self.product.next_step()),
            ExitAction::ReturnToDashboard => None,
        };
        Ok(FlowExit {
            action,
            product_key: self.product.key.clone(),
            next_step,
            clips,
        })
    }

    /// Abandons the flow, tearing down any live capture session.
    pub async fn cancel(mut self) {
        if let Some(timer) = self.processing_timer.take() {
            timer.abort();
        }
        if let Some(capture) = self.capture.take() {
            capture.teardown().await;
        }
        log::info!("{} verification cancelled", self.product.title);
    }

    fn open_capture(&self, index: usize) -> CaptureSession {
        let question = self.session.questions()[index].clone();
        let max_duration = question
            .max_duration_seconds
            .unwrap_or(self.env.config.max_duration_seconds);
        CaptureSession::open(self.env.clone(), question, max_duration)
    }

    fn publish(&self) {
        self.stage_tx.send_replace(self.session.stage());
    }
}

impl Drop for VerificationFlow {
    fn drop(&mut self) {
        if let Some(timer) = self.processing_timer.take() {
            timer.abort();
        }
    }
}
