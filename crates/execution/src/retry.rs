//! Retry orchestration: failure classification, temperature-adjusted
//! retry decisions, and retry history statistics.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use atomflow_core::{Atom, AttemptOutcome, ErrorCategory, ExecutionConfig, RetryAttempt};
use atomflow_storage::PlanStore;
use regex::Regex;
use tracing::{debug, info};

/// Decision for one atom failure.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Run the atom again.
    Retry {
        /// 1-based attempt number this retry will be
        attempt: u32,
        /// Classified category of the failure being retried
        category: ErrorCategory,
        /// Generation temperature for the regeneration
        temperature: f64,
        /// Backoff to apply before the retry is released
        delay: Duration,
        /// Category-specific hint appended to the regeneration request
        feedback: String,
    },
    /// Retries are exhausted; the atom is failed-final.
    GiveUp {
        /// Category of the final failure
        category: ErrorCategory,
    },
}

/// Classifies validator failures and decides whether and how to retry.
pub struct RetryOrchestrator {
    config: ExecutionConfig,
    store: Arc<dyn PlanStore>,
    patterns: Vec<(Regex, ErrorCategory)>,
}

impl RetryOrchestrator {
    /// Create an orchestrator recording history through the given store.
    pub fn new(config: ExecutionConfig, store: Arc<dyn PlanStore>) -> Self {
        Self {
            config,
            store,
            patterns: Self::build_patterns(),
        }
    }

    fn build_patterns() -> Vec<(Regex, ErrorCategory)> {
        // Checked in order; first match wins. Anything unmatched is
        // Unknown, which still gets a generic retry.
        let table: [(&str, ErrorCategory); 6] = [
            (
                r"(?i)undefined (symbol|function|variable|reference|name)|unresolved import|not found in (this )?scope|missing dependency|no such (module|symbol)",
                ErrorCategory::Dependency,
            ),
            (
                r"(?i)syntax error|parse error|unexpected (token|eof|end of (input|file))|unclosed delimiter|invalid syntax",
                ErrorCategory::Syntax,
            ),
            (
                r"(?i)type (error|mismatch)|mismatched types|cannot (convert|coerce)|incompatible type|expected .+, found",
                ErrorCategory::Type,
            ),
            (
                r"(?i)context (window|length|limit)|token limit|prompt too (long|large)|input too long",
                ErrorCategory::Context,
            ),
            (
                r"(?i)timed? ?out|deadline exceeded",
                ErrorCategory::Timeout,
            ),
            (
                r"(?i)assertion (failed|error)|test(s)? failed|wrong (result|output|answer)|incorrect (result|output|behavior)|logic error",
                ErrorCategory::Logic,
            ),
        ];

        table
            .into_iter()
            .map(|(pattern, category)| {
                (Regex::new(pattern).expect("static pattern compiles"), category)
            })
            .collect()
    }

    /// Classify a validator/collaborator error message. Ambiguous output
    /// is never guessed at; it classifies as `Unknown`.
    pub fn classify(&self, error: &str) -> ErrorCategory {
        for (pattern, category) in &self.patterns {
            if pattern.is_match(error) {
                return *category;
            }
        }
        ErrorCategory::Unknown
    }

    /// Decide what to do about a failed atom and append the decision to
    /// its retry history. `atom.retry_count` is the number of retries
    /// already consumed.
    pub async fn handle_failure(
        &self,
        atom: &Atom,
        error: &str,
    ) -> Result<RetryDecision, atomflow_storage::StoreError> {
        let category = self.classify(error);
        let attempt = atom.retry_count + 1;

        match self.config.temperature_for_attempt(attempt) {
            Some(temperature) => {
                let delay = self.config.backoff_for_attempt(attempt);
                let feedback = self.build_feedback(atom, category, error);

                let record =
                    RetryAttempt::retried(atom.id, attempt, category, temperature, delay);
                self.store.append_retry_attempt(&record).await?;

                info!(
                    atom = %atom.id,
                    attempt,
                    category = %category,
                    temperature,
                    delay_ms = delay.as_millis() as u64,
                    "scheduling retry"
                );
                Ok(RetryDecision::Retry {
                    attempt,
                    category,
                    temperature,
                    delay,
                    feedback,
                })
            }
            None => {
                let record = RetryAttempt::gave_up(atom.id, attempt, category);
                self.store.append_retry_attempt(&record).await?;

                info!(atom = %atom.id, attempt, category = %category, "retries exhausted");
                Ok(RetryDecision::GiveUp { category })
            }
        }
    }

    /// Record that an atom's latest retry ended in success.
    pub async fn record_success(
        &self,
        atom: &Atom,
    ) -> Result<(), atomflow_storage::StoreError> {
        // retry_count is the attempt that just succeeded.
        let record = RetryAttempt::retried(
            atom.id,
            atom.retry_count,
            atom.last_error.unwrap_or(ErrorCategory::Unknown),
            self.config
                .temperature_for_attempt(atom.retry_count)
                .unwrap_or(0.0),
            Duration::ZERO,
        )
        .succeeded();
        self.store.append_retry_attempt(&record).await
    }

    /// Build the category-specific hint for the regeneration request.
    /// This core only constructs the text; the external generator
    /// consumes it.
    fn build_feedback(&self, atom: &Atom, category: ErrorCategory, error: &str) -> String {
        let mut hint = match category {
            ErrorCategory::Dependency => {
                let mut needed: Vec<&str> = atom
                    .symbols
                    .used_functions
                    .iter()
                    .chain(atom.symbols.used_types.iter())
                    .chain(atom.symbols.used_variables.iter())
                    .map(|s| s.as_str())
                    .collect();
                needed.sort_unstable();
                format!(
                    "A required symbol was unavailable. Symbols this unit relies on: {}. Generate code that only references these once they exist.",
                    needed.join(", ")
                )
            }
            ErrorCategory::Syntax => {
                let location = error
                    .lines()
                    .find(|l| l.contains("line") || l.contains(':'))
                    .unwrap_or(error);
                format!(
                    "The previous output did not parse. Parser report: {}. Regenerate the full unit with valid syntax.",
                    location.trim()
                )
            }
            ErrorCategory::Type => {
                "The previous output failed type checking. Match the declared signatures and the types of the symbols this unit uses.".to_string()
            }
            ErrorCategory::Logic => {
                "The previous output compiled but failed semantic validation. Re-derive the behavior from the unit description rather than patching the prior attempt.".to_string()
            }
            ErrorCategory::Timeout => {
                "The previous attempt did not finish in time. Produce a simpler, direct implementation.".to_string()
            }
            ErrorCategory::Context => {
                "The previous request overflowed the generation context. Keep the output minimal and self-contained.".to_string()
            }
            ErrorCategory::Unknown => {
                "The previous attempt failed validation. Regenerate the unit from scratch.".to_string()
            }
        };

        if category != ErrorCategory::Syntax && !error.is_empty() {
            hint.push_str(" Validator output: ");
            hint.push_str(error.trim());
        }
        debug!(atom = %atom.id, category = %category, "built retry feedback");
        hint
    }
}

/// Per-category attempt statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CategoryStats {
    /// Attempts recorded for this category
    pub attempts: usize,
    /// Attempts whose retry eventually succeeded
    pub successes: usize,
}

impl CategoryStats {
    /// Fraction of attempts that succeeded.
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            return 0.0;
        }
        self.successes as f64 / self.attempts as f64
    }
}

/// Read-only statistics derived from retry history.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    /// Total attempts recorded
    pub total_attempts: usize,
    /// Attempts grouped by failure category
    pub by_category: HashMap<ErrorCategory, CategoryStats>,
    /// Mean attempt number at which retried atoms succeeded
    pub average_attempts_to_success: Option<f64>,
}

impl RetryStats {
    /// Derive statistics from an attempt history.
    pub fn from_history(history: &[RetryAttempt]) -> Self {
        let mut by_category: HashMap<ErrorCategory, CategoryStats> = HashMap::new();
        let mut success_attempts = Vec::new();

        for attempt in history {
            let entry = by_category.entry(attempt.error_category).or_default();
            entry.attempts += 1;
            if attempt.outcome == AttemptOutcome::Succeeded {
                entry.successes += 1;
                success_attempts.push(attempt.attempt_number as f64);
            }
        }

        let average_attempts_to_success = if success_attempts.is_empty() {
            None
        } else {
            Some(success_attempts.iter().sum::<f64>() / success_attempts.len() as f64)
        };

        Self {
            total_attempts: history.len(),
            by_category,
            average_attempts_to_success,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atomflow_core::PlanId;
    use atomflow_storage::MemoryStore;

    fn orchestrator(store: Arc<MemoryStore>) -> RetryOrchestrator {
        RetryOrchestrator::new(ExecutionConfig::default(), store)
    }

    #[test]
    fn classification_table() {
        let orchestrator = orchestrator(Arc::new(MemoryStore::new()));
        let cases = [
            ("syntax error at line 3", ErrorCategory::Syntax),
            ("unexpected token `}`", ErrorCategory::Syntax),
            ("mismatched types: expected i64, found String", ErrorCategory::Type),
            ("assertion failed: output != expected", ErrorCategory::Logic),
            ("request timed out after 120s", ErrorCategory::Timeout),
            ("undefined function `parse_header`", ErrorCategory::Dependency),
            ("name `Config` not found in this scope", ErrorCategory::Dependency),
            ("prompt too long for context window", ErrorCategory::Context),
            ("something inexplicable happened", ErrorCategory::Unknown),
            ("", ErrorCategory::Unknown),
        ];
        for (error, expected) in cases {
            assert_eq!(orchestrator.classify(error), expected, "for {error:?}");
        }
    }

    #[tokio::test]
    async fn temperature_schedule_across_attempts() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(store.clone());
        let mut atom = Atom::new(PlanId::new(), "a", "");

        let mut temperatures = Vec::new();
        for expected_attempt in 1..=3u32 {
            let decision = orchestrator
                .handle_failure(&atom, "syntax error near line 1")
                .await
                .unwrap();
            match decision {
                RetryDecision::Retry {
                    attempt,
                    temperature,
                    delay,
                    ..
                } => {
                    assert_eq!(attempt, expected_attempt);
                    assert_eq!(delay, Duration::from_secs(1 << (expected_attempt - 1)));
                    temperatures.push(temperature);
                    atom.retry_count = attempt;
                }
                RetryDecision::GiveUp { .. } => panic!("gave up too early"),
            }
        }
        assert_eq!(temperatures, vec![0.7, 0.5, 0.3]);

        // Fourth failure gives up.
        let decision = orchestrator
            .handle_failure(&atom, "syntax error near line 1")
            .await
            .unwrap();
        assert_eq!(
            decision,
            RetryDecision::GiveUp {
                category: ErrorCategory::Syntax
            }
        );

        // Every decision, including the give-up, was recorded.
        let history = store.list_retry_attempts(atom.id).await.unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[3].outcome, AttemptOutcome::GaveUp);
    }

    #[tokio::test]
    async fn dependency_feedback_lists_needed_symbols() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(store);
        let mut atom = Atom::new(PlanId::new(), "b", "");
        atom.symbols.used_functions.insert("read_config".to_string());
        atom.symbols.used_types.insert("Config".to_string());

        let decision = orchestrator
            .handle_failure(&atom, "undefined function `read_config`")
            .await
            .unwrap();
        let RetryDecision::Retry { feedback, .. } = decision else {
            panic!("expected retry");
        };
        assert!(feedback.contains("read_config"));
        assert!(feedback.contains("Config"));
    }

    #[test]
    fn stats_from_history() {
        let atom_a = atomflow_core::AtomId::new();
        let atom_b = atomflow_core::AtomId::new();
        let history = vec![
            RetryAttempt::retried(atom_a, 1, ErrorCategory::Syntax, 0.7, Duration::from_secs(1)),
            RetryAttempt::retried(atom_a, 2, ErrorCategory::Syntax, 0.5, Duration::from_secs(2))
                .succeeded(),
            RetryAttempt::gave_up(atom_b, 4, ErrorCategory::Logic),
        ];

        let stats = RetryStats::from_history(&history);
        assert_eq!(stats.total_attempts, 3);
        assert_eq!(stats.by_category[&ErrorCategory::Syntax].attempts, 2);
        assert_eq!(stats.by_category[&ErrorCategory::Syntax].successes, 1);
        assert_eq!(stats.by_category[&ErrorCategory::Logic].successes, 0);
        assert_eq!(stats.average_attempts_to_success, Some(2.0));
        assert!((stats.by_category[&ErrorCategory::Syntax].success_rate() - 0.5).abs() < 1e-9);
    }
}
