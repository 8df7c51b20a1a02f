use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::capture::domain::capture_attempt::CaptureAttempt;
use crate::capture::domain::capture_error::CaptureError;
use crate::shared::clip::Clip;
use crate::verification::domain::question::Question;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStage {
    Intro,
    Verification,
    Processing,
    Complete,
}

impl fmt::Display for FlowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Intro => "intro",
            Self::Verification => "verification",
            Self::Processing => "processing",
            Self::Complete => "complete",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    #[error("product {0} has no verification questions")]
    NoQuestions(String),
    #[error("cannot {action} during the {stage} stage")]
    WrongStage { action: &'static str, stage: FlowStage },
    #[error("no capture session is active")]
    NoActiveCapture,
    #[error("response for question {got} arrived while question {expected} is active")]
    OutOfOrder { expected: usize, got: usize },
    #[error("question {0} has no accepted response")]
    Incomplete(usize),
    #[error("question at position {position} is numbered {index}")]
    Misnumbered { position: usize, index: usize },
    #[error("question {0} allows no recording time")]
    ZeroDuration(usize),
    #[error(transparent)]
    Capture(#[from] CaptureError),
}

/// Where the flow goes after a response is accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Advance {
    NextQuestion(usize),
    Processing,
}

/// One applicant's pass through the questions of a product.
///
/// Holds at most one accepted attempt per question and cannot complete
/// while any question lacks one.
#[derive(Debug)]
pub struct VerificationSession {
    questions: Vec<Question>,
    attempts: Vec<Option<CaptureAttempt>>,
    stage: FlowStage,
    current: usize,
}

impl VerificationSession {
    pub fn new(product_key: &str, questions: Vec<Question>) -> Result<Self, FlowError> {
        if questions.is_empty() {
            return Err(FlowError::NoQuestions(product_key.to_string()));
        }
        for (position, question) in questions.iter().enumerate() {
            if question.index != position {
                return Err(FlowError::Misnumbered {
                    position,
                    index: question.index,
                });
            }
            if question.max_duration_seconds == Some(0) {
                return Err(FlowError::ZeroDuration(position));
            }
        }
        let attempts = vec![None; questions.len()];
        Ok(Self {
            questions,
            attempts,
            stage: FlowStage::Intro,
            current: 0,
        })
    }

    pub fn stage(&self) -> FlowStage {
        self.stage
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    /// The question being answered; `None` outside the verification stage.
    pub fn current_question(&self) -> Option<&Question> {
        (self.stage == FlowStage::Verification).then(|| &self.questions[self.current])
    }

    pub fn begin_verification(&mut self) -> Result<(), FlowError> {
        self.expect_stage(FlowStage::Intro, "begin verification")?;
        self.stage = FlowStage::Verification;
        Ok(())
    }

    /// Checks that a response for `question_index` would be taken now.
    pub fn expect_response(&self, question_index: usize) -> Result<(), FlowError> {
        self.expect_stage(FlowStage::Verification, "record a response")?;
        if question_index != self.current {
            return Err(FlowError::OutOfOrder {
                expected: self.current,
                got: question_index,
            });
        }
        Ok(())
    }

    pub fn record_accepted(&mut self, attempt: CaptureAttempt) -> Result<Advance, FlowError> {
        self.expect_response(attempt.question_index)?;
        if !attempt.is_accepted() {
            return Err(FlowError::Incomplete(self.current));
        }

        self.attempts[self.current] = Some(attempt);
        if self.current + 1 < self.questions.len() {
            self.current += 1;
            Ok(Advance::NextQuestion(self.current))
        } else {
            self.stage = FlowStage::Processing;
            Ok(Advance::Processing)
        }
    }

    pub fn complete(&mut self) -> Result<(), FlowError> {
        self.expect_stage(FlowStage::Processing, "complete")?;
        if let Some(missing) = self
            .attempts
            .iter()
            .position(|a| !a.as_ref().is_some_and(CaptureAttempt::is_accepted))
        {
            return Err(FlowError::Incomplete(missing));
        }
        self.stage = FlowStage::Complete;
        Ok(())
    }

    pub fn attempts(&self) -> impl Iterator<Item = &CaptureAttempt> {
        self.attempts.iter().flatten()
    }

    /// The accepted clips in question order. Only available once complete.
    pub fn accepted_clips(&self) -> Result<Vec<Clip>, FlowError> {
        self.expect_stage(FlowStage::Complete, "collect clips")?;
        Ok(self
            .attempts
            .iter()
            .flatten()
            .filter_map(|a| a.clip.clone())
            .collect())
    }

    fn expect_stage(&self, stage: FlowStage, action: &'static str) -> Result<(), FlowError> {
        if self.stage == stage {
            Ok(())
        } else {
            Err(FlowError::WrongStage {
                action,
                stage: self.stage,
            })
        }
    }
}
