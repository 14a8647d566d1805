//! Decides which code-generation phases a project needs.
//!
//! The tech-stack description produced by the architecture phase is handed to
//! a [`StackClassifier`]. Its answer, a [`StackRequirements`], gates the
//! development and frontend phases.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::phase::Phase;

/// Which code-generation phases must run. Never both false.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StackRequirements {
    backend_required: bool,
    frontend_required: bool,
}

impl StackRequirements {
    /// Build requirements, forcing the backend on when neither side is required.
    pub fn new(backend_required: bool, frontend_required: bool) -> Self {
        if !backend_required && !frontend_required {
            warn!("Stack requires neither backend nor frontend, forcing backend");
            return Self {
                backend_required: true,
                frontend_required: false,
            };
        }
        Self {
            backend_required,
            frontend_required,
        }
    }

    pub fn full() -> Self {
        Self::new(true, true)
    }

    pub fn backend_required(&self) -> bool {
        self.backend_required
    }

    pub fn frontend_required(&self) -> bool {
        self.frontend_required
    }

    /// Whether `phase` must run. Only development and frontend can be skipped.
    pub fn requires(&self, phase: Phase) -> bool {
        match phase {
            Phase::Development => self.backend_required,
            Phase::Frontend => self.frontend_required,
            _ => true,
        }
    }
}

pub trait StackClassifier: Send + Sync {
    fn classify(&self, stack_description: &str) -> StackRequirements;
}

/// Always returns the same requirements. Used for the `[stack]` config override.
#[derive(Debug, Clone, Copy)]
pub struct FixedStackClassifier(pub StackRequirements);

impl StackClassifier for FixedStackClassifier {
    fn classify(&self, _stack_description: &str) -> StackRequirements {
        self.0
    }
}

static BACKEND_SIGNALS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(backend|back-end|server|api|rest|graphql|grpc|database|postgres(ql)?|mysql|sqlite|mongodb|redis|express|fastapi|django|flask|spring|rails|axum|actix|node\.js|endpoints?|microservices?|cli|worker queue)\b",
    )
    .unwrap()
});

static FRONTEND_SIGNALS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(frontend|front-end|react|vue|angular|svelte|next\.js|nuxt|html|css|tailwind|ui|user interface|web app|single[- ]page|spa|components?|browser|dashboard)\b",
    )
    .unwrap()
});

static NO_BACKEND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(no backend|without an? backend|backend: none|static site|frontend only|front-end only|client-side only)\b",
    )
    .unwrap()
});

static NO_FRONTEND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(no frontend|no ui|without an? (frontend|ui)|frontend: none|headless|cli only|api only|backend only)\b",
    )
    .unwrap()
});

/// Keyword scoring over the stack description, with explicit negations.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordStackClassifier;

impl StackClassifier for KeywordStackClassifier {
    fn classify(&self, stack_description: &str) -> StackRequirements {
        let backend_score = BACKEND_SIGNALS.find_iter(stack_description).count();
        let frontend_score = FRONTEND_SIGNALS.find_iter(stack_description).count();

        let backend = backend_score > 0 && !NO_BACKEND.is_match(stack_description);
        let frontend = frontend_score > 0 && !NO_FRONTEND.is_match(stack_description);

        debug!(backend_score, frontend_score, backend, frontend, "Classified stack");
        StackRequirements::new(backend, frontend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> StackRequirements {
        KeywordStackClassifier.classify(text)
    }

    #[test]
    fn test_never_both_false() {
        let req = StackRequirements::new(false, false);
        assert!(req.backend_required());
        assert!(!req.frontend_required());
    }

    #[test]
    fn test_full_stack_description() {
        let req = classify("React frontend with a FastAPI backend and PostgreSQL database");
        assert!(req.backend_required());
        assert!(req.frontend_required());
    }

    #[test]
    fn test_static_site_has_no_backend() {
        let req = classify("A static site built with plain HTML, CSS and Tailwind. No backend.");
        assert!(!req.backend_required());
        assert!(req.frontend_required());
        assert!(!req.requires(Phase::Development));
        assert!(req.requires(Phase::Frontend));
    }

    #[test]
    fn test_cli_only_has_no_frontend() {
        let req = classify("Rust CLI only, storing data in SQLite");
        assert!(req.backend_required());
        assert!(!req.frontend_required());
    }

    #[test]
    fn test_headless_api() {
        let req = classify("Headless REST API using Axum; api only");
        assert!(req.backend_required());
        assert!(!req.frontend_required());
    }

    #[test]
    fn test_unrecognized_description_defaults_to_backend() {
        let req = classify("Something bespoke");
        assert!(req.backend_required());
        assert!(!req.frontend_required());
    }

    #[test]
    fn test_non_code_phases_always_required() {
        let req = StackRequirements::new(false, true);
        for phase in [Phase::Meta, Phase::ProductOwner, Phase::Designer, Phase::TechArchitect] {
            assert!(req.requires(phase));
        }
    }

    #[test]
    fn test_fixed_classifier_ignores_text() {
        let fixed = FixedStackClassifier(StackRequirements::new(false, true));
        let req = fixed.classify("Django backend");
        assert!(!req.backend_required());
    }
}
