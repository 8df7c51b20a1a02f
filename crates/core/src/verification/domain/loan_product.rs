use serde::Serialize;

use crate::verification::domain::question::Question;

const ID_CARD_PROMPT: &str =
    "Please hold your ID card clearly in front of the camera for verification.";

struct ProductEntry {
    key: &'static str,
    title: &'static str,
    welcome: &'static str,
    prompts: [&'static str; 3],
}

const CATALOG: &[ProductEntry] = &[
    ProductEntry {
        key: "personal",
        title: "Personal Loan",
        welcome: "Welcome to your Personal Loan application. I'll guide you through the verification process.",
        prompts: [
            ID_CARD_PROMPT,
            "Please state your full name and the purpose of this personal loan.",
            "Could you confirm your monthly income and existing financial commitments?",
        ],
    },
    ProductEntry {
        key: "home",
        title: "Home Loan",
        welcome: "Welcome to your Home Loan application. Let's verify your details to proceed with your property purchase.",
        prompts: [
            ID_CARD_PROMPT,
            "Please show the property documents or details of the property you wish to purchase.",
            "Could you confirm your employment status and duration at your current workplace?",
        ],
    },
    ProductEntry {
        key: "education",
        title: "Education Loan",
        welcome: "Welcome to your Education Loan application. I'll help you secure funding for your educational journey.",
        prompts: [
            ID_CARD_PROMPT,
            "Please show your admission letter or course details document.",
            "Could you share details about the institution and course duration?",
        ],
    },
    ProductEntry {
        key: "business",
        title: "Business Loan",
        welcome: "Welcome to your Business Loan application. Let's get your business the funding it needs.",
        prompts: [
            ID_CARD_PROMPT,
            "Please show your business registration documents or license.",
            "Could you share information about your business revenue and growth plans?",
        ],
    },
    ProductEntry {
        key: "vehicle",
        title: "Vehicle Loan",
        welcome: "Welcome to your Vehicle Loan application. I'll help you get on the road with your new vehicle.",
        prompts: [
            ID_CARD_PROMPT,
            "Please show the vehicle quotation or details of the vehicle you wish to purchase.",
            "Could you confirm your driving license details?",
        ],
    },
];

const FALLBACK_KEY: &str = "personal";

/// A loan product and the verification questions it asks, in order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LoanProduct {
    pub key: String,
    pub title: String,
    pub welcome_message: String,
    pub intro_clip: Option<String>,
    pub questions: Vec<Question>,
}

impl LoanProduct {
    /// Looks up a catalog product. Unknown keys fall back to the personal
    /// loan.
    pub fn for_key(key: &str) -> Self {
        let entry = CATALOG
            .iter()
            .find(|e| e.key == key)
            .or_else(|| CATALOG.iter().find(|e| e.key == FALLBACK_KEY))
            .unwrap_or(&CATALOG[0]);
        Self::from_entry(entry)
    }

    pub fn catalog() -> Vec<Self> {
        CATALOG.iter().map(Self::from_entry).collect()
    }

    pub fn keys() -> impl Iterator<Item = &'static str> {
        CATALOG.iter().map(|e| e.key)
    }

    /// A product outside the catalog, for callers that source questions
    /// elsewhere.
    pub fn custom(
        key: impl Into<String>,
        title: impl Into<String>,
        welcome_message: impl Into<String>,
        intro_clip: Option<String>,
        questions: Vec<Question>,
    ) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            welcome_message: welcome_message.into(),
            intro_clip,
            questions,
        }
    }

    /// Route of the application step that follows verification.
    pub fn next_step(&self) -> String {
        format!("/loan-application/{}/details", self.key)
    }

    fn from_entry(entry: &ProductEntry) -> Self {
        let questions = entry
            .prompts
            .iter()
            .enumerate()
            .map(|(i, prompt)| {
                Question::new(i, *prompt)
                    .with_prompt_clip(format!("/videos/{}-question-{}.mp4", entry.key, i + 1))
            })
            .collect();
        Self {
            key: entry.key.to_string(),
            title: entry.title.to_string(),
            welcome_message: entry.welcome.to_string(),
            intro_clip: Some(format!("/videos/{}-loan-intro.mp4", entry.key)),
            questions,
        }
    }
}
