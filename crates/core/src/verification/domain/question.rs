use serde::Serialize;

/// One verification question. Immutable once the product is chosen.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Question {
    pub index: usize,
    pub prompt: String,
    /// Pre-recorded clip briefing the applicant; must be watched before
    /// recording when present.
    pub prompt_clip: Option<String>,
    /// Overrides the configured recording limit for this question.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_duration_seconds: Option<u32>,
}

impl Question {
    pub fn new(index: usize, prompt: impl Into<String>) -> Self {
        Self {
            index,
            prompt: prompt.into(),
            prompt_clip: None,
            max_duration_seconds: None,
        }
    }

    pub fn with_prompt_clip(mut self, clip: impl Into<String>) -> Self {
        self.prompt_clip = Some(clip.into());
        self
    }

    pub fn with_max_duration(mut self, seconds: u32) -> Self {
        self.max_duration_seconds = Some(seconds);
        self
    }

    pub fn has_prompt_clip(&self) -> bool {
        self.prompt_clip.is_some()
    }
}
