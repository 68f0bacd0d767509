/// Result strings that count as a passed test. Compared case-insensitively,
/// whole-string only.
pub const SUCCESS_RESULTS: [&str; 6] = ["sikeres", "success", "ok", "pass", "true", "1"];

/// Whether a result text is a success outcome.
pub fn is_success(result: &str) -> bool {
    let normalized = result.trim().to_lowercase();
    SUCCESS_RESULTS.contains(&normalized.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_vocabulary_case_insensitive() {
        for text in ["SUCCESS", "Sikeres", "1", "true", "ok", "Pass", " ok "] {
            assert!(is_success(text), "{text:?} should be a success");
        }
    }

    #[test]
    fn test_non_success_results() {
        for text in ["failed", "0", "", "false", "sikertelen"] {
            assert!(!is_success(text), "{text:?} should not be a success");
        }
    }

    #[test]
    fn test_exact_match_not_substring() {
        for text in ["successful", "okay", "passed", "10", "not ok"] {
            assert!(!is_success(text), "{text:?} should not be a success");
        }
    }
}
