//! Human-readable agent identifiers.
//!
//! Agent ids look like `agent-<name>-<role>` with a numeric suffix when the
//! plain form is already taken (`agent-max-dev-2`, `agent-max-dev-3`, ...).

use unicode_normalization::UnicodeNormalization;

/// Names handed out when a spawn request does not name its agent.
pub const NAME_POOL: [&str; 10] = [
    "david", "lucile", "max", "sarah", "leo", "ines", "nora", "adam", "jade", "yannis",
];

const FALLBACK_PART: &str = "worker";

/// Lowercase, dash-separated ASCII form of `value`.
///
/// Accents are decomposed and dropped, punctuation removed, and runs of
/// whitespace, underscores or dashes collapse to a single dash.
pub fn slugify(value: &str) -> String {
    let kept: String = value
        .nfkd()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-' || c.is_whitespace())
        .collect();

    let mut slug = String::with_capacity(kept.len());
    for c in kept.trim().to_lowercase().chars() {
        let c = if c.is_whitespace() || c == '_' { '-' } else { c };
        if c == '-' && slug.ends_with('-') {
            continue;
        }
        slug.push(c);
    }

    slug.trim_matches('-').to_string()
}

/// Pick a name from [`NAME_POOL`] using `seed`.
pub fn generate_agent_name(seed: u64) -> &'static str {
    NAME_POOL[(seed % NAME_POOL.len() as u64) as usize]
}

/// Candidate id for the `collision_index`-th agent with this name and role.
pub fn build_agent_id(name: &str, role: &str, collision_index: usize) -> String {
    let name = non_empty_or_fallback(slugify(name));
    let role = non_empty_or_fallback(slugify(role));
    let base = format!("agent-{}-{}", name, role);
    if collision_index > 0 {
        format!("{}-{}", base, collision_index + 1)
    } else {
        base
    }
}

fn non_empty_or_fallback(slug: String) -> String {
    if slug.is_empty() {
        FALLBACK_PART.to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Backend Dev"), "backend-dev");
        assert_eq!(slugify("  QA__tester  "), "qa-tester");
        assert_eq!(slugify("Lucile!"), "lucile");
        assert_eq!(slugify("--a---b--"), "a-b");
        assert_eq!(slugify("Élodie Müller"), "elodie-muller");
        assert_eq!(slugify("???"), "");
    }

    #[test]
    fn test_build_agent_id() {
        assert_eq!(build_agent_id("Max", "dev", 0), "agent-max-dev");
        assert_eq!(build_agent_id("Max", "dev", 1), "agent-max-dev-2");
        assert_eq!(build_agent_id("Max", "dev", 4), "agent-max-dev-5");
        assert_eq!(build_agent_id("", "!!", 0), "agent-worker-worker");
    }

    #[test]
    fn test_generate_agent_name_wraps() {
        assert_eq!(generate_agent_name(0), "david");
        assert_eq!(generate_agent_name(2), "max");
        assert_eq!(generate_agent_name(12), "max");
    }
}
