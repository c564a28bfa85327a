//! Keyword tag classification.

use tenderwatch_shared::TagRules;

/// Tags whose keywords occur (case-insensitively) in the title or description.
///
/// Output follows rule order and never repeats a tag name. Empty keywords
/// never match.
pub fn classify(title: &str, description: &str, rules: &TagRules) -> Vec<String> {
    let haystack = format!("{title} {description}").to_lowercase();
    let mut tags: Vec<String> = Vec::new();

    for rule in rules.iter() {
        if tags.iter().any(|t| t == &rule.name) {
            continue;
        }
        let matched = rule
            .keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .any(|k| !k.is_empty() && haystack.contains(&k));
        if matched {
            tags.push(rule.name.clone());
        }
    }

    tags
}
