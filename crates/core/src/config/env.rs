//! Environment variable expansion for config files.

/// Expand `${VAR_NAME}` patterns with environment variable values.
/// Unset variables are left as written.
pub fn expand_env(s: &str) -> String {
    let Ok(re) = regex_lite::Regex::new(r"\$\{([^}]+)\}") else {
        return s.to_string();
    };

    let mut result = s.to_string();
    for cap in re.captures_iter(s) {
        if let (Some(full_match), Some(var_match)) = (cap.get(0), cap.get(1)) {
            if let Ok(value) = std::env::var(var_match.as_str()) {
                result = result.replace(full_match.as_str(), &value);
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env() {
        // Unique var name to avoid conflicts with parallel tests
        std::env::set_var("RISK_AGENT_ENV_TEST_VAR", "test_value");
        assert_eq!(expand_env("${RISK_AGENT_ENV_TEST_VAR}"), "test_value");
        assert_eq!(
            expand_env("prefix_${RISK_AGENT_ENV_TEST_VAR}_suffix"),
            "prefix_test_value_suffix"
        );
        assert_eq!(expand_env("no_vars"), "no_vars");
        assert_eq!(
            expand_env("${RISK_AGENT_ENV_TEST_UNSET}"),
            "${RISK_AGENT_ENV_TEST_UNSET}"
        );
        std::env::remove_var("RISK_AGENT_ENV_TEST_VAR");
    }
}
