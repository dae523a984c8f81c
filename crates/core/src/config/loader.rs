//! Environment expansion for configuration files.

use regex_lite::Regex;

const ENV_REFERENCE: &str = r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}";

/// Replace every `${VAR}` with the value of `VAR`.
///
/// Unset variables are left as written so the TOML parser reports them
/// where they are used.
pub fn expand_env(input: &str) -> String {
    let Ok(pattern) = Regex::new(ENV_REFERENCE) else {
        return input.to_string();
    };
    pattern
        .replace_all(input, |caps: &regex_lite::Captures<'_>| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expands_set_variables() {
        std::env::set_var("LIQ_TEST_PROGRAM", "0xabc");
        assert_eq!(
            expand_env("program_id = \"${LIQ_TEST_PROGRAM}\""),
            "program_id = \"0xabc\""
        );
    }

    #[test]
    fn test_unset_variables_kept() {
        assert_eq!(expand_env("x = \"${LIQ_TEST_UNSET_VAR}\""), "x = \"${LIQ_TEST_UNSET_VAR}\"");
    }

    #[test]
    fn test_plain_text_untouched() {
        assert_eq!(expand_env("min_gap_ms = 250"), "min_gap_ms = 250");
    }
}
