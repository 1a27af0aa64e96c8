//! Keyword-based intent detection.
//!
//! The table is ordered and the first category with a matching keyword
//! wins. Pricing sits above curriculum so that "how much does the program
//! cost" is a pricing question even though it mentions "program".

use coursechat_common::ContextCategory;

const INTENT_TABLE: &[(ContextCategory, &[&str])] = &[
    (
        ContextCategory::Pricing,
        &[
            "cost", "price", "pricing", "tuition", "fee", "how much", "payment", "afford",
            "scholarship", "financing", "discount", "refund",
        ],
    ),
    (
        ContextCategory::Schedule,
        &[
            "schedule", "when does", "start date", "timeline", "hours per week", "part-time",
            "part time", "full-time", "full time", "deadline", "calendar", "cohort",
        ],
    ),
    (
        ContextCategory::Requirements,
        &[
            "requirement", "prerequisite", "prereq", "eligible", "eligibility", "qualify",
            "do i need", "background", "experience needed",
        ],
    ),
    (
        ContextCategory::Enrollment,
        &[
            "enroll", "apply", "application", "sign up", "register", "join", "admission",
        ],
    ),
    (
        ContextCategory::Outcomes,
        &[
            "job", "career", "salary", "outcome", "placement", "hired", "employment",
            "graduates",
        ],
    ),
    (
        ContextCategory::Projects,
        &["project", "portfolio", "capstone", "build"],
    ),
    (
        ContextCategory::Programs,
        &["programs", "bootcamps", "tracks", "courses do you offer", "which course"],
    ),
    (
        ContextCategory::Curriculum,
        &[
            "curriculum", "syllabus", "module", "topics", "what will i learn", "learn",
            "course content", "program", "lesson", "technologies",
        ],
    ),
    (
        ContextCategory::Support,
        &[
            "help", "support", "problem", "issue", "error", "bug", "login", "password",
            "access", "stuck", "technical",
        ],
    ),
    (
        ContextCategory::Faq,
        &["faq", "frequently asked", "common question"],
    ),
];

/// Return the first category whose keywords appear in `message`.
pub fn detect_intent(message: &str) -> Option<ContextCategory> {
    let lowered = message.to_lowercase();
    INTENT_TABLE
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k)))
        .map(|(category, _)| *category)
}
