use crate::recovery::ErrorHandler;
use crate::state::ProcessState;
use std::collections::BTreeMap;

/// How many of the most recent errors a report shows.
const REPORT_ERROR_LIMIT: usize = 5;

impl ErrorHandler {
    /// Human-readable summary of the run's errors and retries.
    pub fn generate_error_report(&self, state: &ProcessState) -> String {
        let errors = state.errors();
        let retries: Vec<_> = state
            .retry_attempts()
            .iter()
            .filter(|(_, count)| **count > 0)
            .collect();

        if errors.is_empty() && retries.is_empty() {
            return "No errors have occurred.".to_string();
        }

        let mut report = vec!["Error report".to_string(), "=".repeat(40)];

        if !errors.is_empty() {
            report.push(String::new());
            report.push("Recent errors:".to_string());
            let skip = errors.len().saturating_sub(REPORT_ERROR_LIMIT);
            for error in &errors[skip..] {
                report.push(format!("- {error}"));
            }
        }

        if !retries.is_empty() {
            report.push(String::new());
            report.push("Retries:".to_string());
            for (phase, count) in retries {
                report.push(format!("- {phase}: {count} retries"));
            }
        }

        if let Some(phase) = state.last_error_phase() {
            report.push(String::new());
            report.push(format!("Last error phase: {phase}"));
        }

        report.join("\n")
    }

    /// Suggested next steps keyed by `immediate`, `manual_intervention`,
    /// `retry` and `review`.
    pub fn suggest_recovery_action(&self, state: &ProcessState) -> BTreeMap<String, String> {
        let mut suggestions = BTreeMap::new();

        if let Some(phase) = state.last_error_phase() {
            if state.retry_count(phase) >= self.max_retry_count() {
                suggestions.insert(
                    "immediate".to_string(),
                    format!("Inspect phase {phase} manually"),
                );
                suggestions.insert(
                    "manual_intervention".to_string(),
                    "Adjust worker parameters or check the input brief".to_string(),
                );
            } else {
                suggestions.insert(
                    "retry".to_string(),
                    format!("Phase {phase} can be re-run"),
                );
            }
        }

        if state.errors().len() > REPORT_ERROR_LIMIT {
            suggestions.insert(
                "review".to_string(),
                "Many errors have occurred; review the worker configuration".to_string(),
            );
        }

        suggestions
    }
}
