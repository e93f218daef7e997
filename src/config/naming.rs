// src/config/naming.rs
// Name normalization for imported server entries

/// Package runners that launch a package by name rather than a binary.
const PACKAGE_RUNNERS: [&str; 5] = ["npx", "bunx", "pnpm", "yarn", "uvx"];

/// Package names under which the gateway itself is published.
const SELF_PACKAGES: [&str; 2] = ["tool-hub-mcp", "toolhub"];

/// Normalize a server name to camelCase. Idempotent.
///
/// Multi-word inputs ("jira-cloud", "my_server", "My Server") become
/// camelCase; single words keep their interior casing but get a lowercase
/// first letter, and all-caps words are lowered entirely.
pub fn camel_case_name(raw: &str) -> String {
    let words: Vec<&str> = raw
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    match words.len() {
        0 => String::new(),
        1 => {
            let word = words[0];
            if word.chars().all(|c| !c.is_lowercase()) {
                word.to_lowercase()
            } else {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_lowercase().chain(chars).collect(),
                    None => String::new(),
                }
            }
        }
        _ => {
            let mut out = words[0].to_lowercase();
            for word in &words[1..] {
                let lowered = word.to_lowercase();
                let mut chars = lowered.chars();
                if let Some(first) = chars.next() {
                    out.extend(first.to_uppercase());
                    out.extend(chars);
                }
            }
            out
        }
    }
}

/// Normalize an environment variable key to UPPER_SNAKE_CASE. Idempotent.
pub fn upper_snake_key(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 4);
    let mut prev_lower = false;
    for c in raw.chars() {
        if c == '-' || c == '.' || c == ' ' {
            out.push('_');
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower {
            out.push('_');
        }
        prev_lower = c.is_lowercase() || c.is_numeric();
        out.extend(c.to_uppercase());
    }
    out
}

/// Detect a descriptor that would launch the gateway itself.
///
/// Registering the gateway as one of its own children recurses on first
/// use, so entries are rejected when the command base name is the gateway
/// binary or when a package runner is handed the gateway package.
pub fn is_self_reference(command: &str, args: &[String]) -> bool {
    let base = command
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(command)
        .trim_end_matches(".exe");

    if SELF_PACKAGES.contains(&base) {
        return true;
    }

    if PACKAGE_RUNNERS.contains(&base) {
        return args.iter().any(|arg| {
            let pkg = arg.split('@').next().unwrap_or(arg);
            SELF_PACKAGES.contains(&pkg)
        });
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camel_case_multi_word() {
        assert_eq!(camel_case_name("jira-cloud"), "jiraCloud");
        assert_eq!(camel_case_name("my_server"), "myServer");
        assert_eq!(camel_case_name("My Server"), "myServer");
        assert_eq!(camel_case_name("github.enterprise"), "githubEnterprise");
    }

    #[test]
    fn test_camel_case_single_word() {
        assert_eq!(camel_case_name("jira"), "jira");
        assert_eq!(camel_case_name("GitHub"), "gitHub");
        assert_eq!(camel_case_name("JIRA"), "jira");
    }

    #[test]
    fn test_camel_case_idempotent() {
        for raw in ["jira-cloud", "My Server", "JIRA", "gitHub", "a_b_c"] {
            let once = camel_case_name(raw);
            assert_eq!(camel_case_name(&once), once, "not idempotent for {raw}");
        }
    }

    #[test]
    fn test_camel_case_empty() {
        assert_eq!(camel_case_name(""), "");
        assert_eq!(camel_case_name("---"), "");
    }

    #[test]
    fn test_upper_snake() {
        assert_eq!(upper_snake_key("apiKey"), "API_KEY");
        assert_eq!(upper_snake_key("api-key"), "API_KEY");
        assert_eq!(upper_snake_key("api key"), "API_KEY");
        assert_eq!(upper_snake_key("token"), "TOKEN");
    }

    #[test]
    fn test_upper_snake_idempotent() {
        for raw in ["apiKey", "API_KEY", "some-long.name", "x1Y2"] {
            let once = upper_snake_key(raw);
            assert_eq!(upper_snake_key(&once), once, "not idempotent for {raw}");
        }
    }

    #[test]
    fn test_self_reference_binary() {
        assert!(is_self_reference("toolhub", &[]));
        assert!(is_self_reference("/usr/local/bin/toolhub", &[]));
        assert!(is_self_reference("C:\\bin\\toolhub.exe", &[]));
        assert!(!is_self_reference("jira-mcp", &[]));
    }

    #[test]
    fn test_self_reference_package_runner() {
        let args = vec!["-y".to_string(), "tool-hub-mcp".to_string()];
        assert!(is_self_reference("npx", &args));

        let versioned = vec!["tool-hub-mcp@1.2.0".to_string()];
        assert!(is_self_reference("bunx", &versioned));

        let other = vec!["-y".to_string(), "@acme/jira-mcp".to_string()];
        assert!(!is_self_reference("npx", &other));
    }

    #[test]
    fn test_self_reference_runner_without_package() {
        assert!(!is_self_reference("npx", &[]));
    }
}
