//! Just enough English inflection to derive default collection names and
//! foreign keys (`post` -> `posts`, `categories` -> `category`).

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref PLURAL_RULES: Vec<(Regex, &'static str)> = vec![
        (Regex::new(r"(?i)(quiz)$").unwrap(), "${1}zes"),
        (Regex::new(r"(?i)(matr|vert|ind)(?:ix|ex)$").unwrap(), "${1}ices"),
        (Regex::new(r"(?i)(x|ch|ss|sh)$").unwrap(), "${1}es"),
        (Regex::new(r"(?i)([^aeiouy]|qu)y$").unwrap(), "${1}ies"),
        (Regex::new(r"(?i)(?:([^f])fe|([lr])f)$").unwrap(), "${1}${2}ves"),
        (Regex::new(r"(?i)(bu|statu|alia)s$").unwrap(), "${1}ses"),
        (Regex::new(r"(?i)(person)$").unwrap(), "people"),
        (Regex::new(r"(?i)(child)$").unwrap(), "${1}ren"),
        (Regex::new(r"(?i)s$").unwrap(), "s"),
        (Regex::new(r"$").unwrap(), "s"),
    ];
    static ref SINGULAR_RULES: Vec<(Regex, &'static str)> = vec![
        (Regex::new(r"(?i)(quiz)zes$").unwrap(), "${1}"),
        (Regex::new(r"(?i)(matr)ices$").unwrap(), "${1}ix"),
        (Regex::new(r"(?i)(vert|ind)ices$").unwrap(), "${1}ex"),
        (Regex::new(r"(?i)(x|ch|ss|sh)es$").unwrap(), "${1}"),
        (Regex::new(r"(?i)([^aeiouy]|qu)ies$").unwrap(), "${1}y"),
        (Regex::new(r"(?i)([lr])ves$").unwrap(), "${1}f"),
        (Regex::new(r"(?i)([^f])ves$").unwrap(), "${1}fe"),
        (Regex::new(r"(?i)(bu|statu|alia)ses$").unwrap(), "${1}s"),
        (Regex::new(r"(?i)people$").unwrap(), "person"),
        (Regex::new(r"(?i)(child)ren$").unwrap(), "${1}"),
        (Regex::new(r"(?i)(ss)$").unwrap(), "${1}"),
        (Regex::new(r"(?i)s$").unwrap(), ""),
    ];
}

const UNCOUNTABLE: [&str; 6] = ["data", "equipment", "information", "news", "series", "sheep"];

fn apply(word: &str, rules: &[(Regex, &'static str)]) -> String {
    if word.is_empty() || UNCOUNTABLE.iter().any(|u| word.eq_ignore_ascii_case(u)) {
        return word.to_owned();
    }
    rules
        .iter()
        .find(|(rule, _)| rule.is_match(word))
        .map(|(rule, replacement)| rule.replace(word, *replacement).into_owned())
        .unwrap_or_else(|| word.to_owned())
}

pub fn pluralize(word: &str) -> String {
    apply(word, &PLURAL_RULES)
}

pub fn singularize(word: &str) -> String {
    apply(word, &SINGULAR_RULES)
}
