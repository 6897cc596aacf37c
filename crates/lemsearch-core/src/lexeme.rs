//! Raw lexeme dump records and their reduction to [`LexicalEntry`].
//!
//! The dump is the Wikidata lexeme export: one JSON object per line, with
//! per-language maps for lemmas, form representations and sense glosses.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::types::LexicalEntry;

const LEXEME_URL_PREFIX: &str = "https://www.wikidata.org/wiki/Lexeme:";

/// A language-tagged string value.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Term {
    #[serde(default)]
    pub value: Option<String>,
}

/// Per-language terms, keyed by language code.
pub type TermMap = BTreeMap<String, Term>;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawForm {
    #[serde(default)]
    pub representations: TermMap,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawSense {
    #[serde(default)]
    pub glosses: TermMap,
}

/// One lexeme as it appears in the dump.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawLexeme {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub lemmas: TermMap,
    #[serde(default)]
    pub forms: Vec<RawForm>,
    #[serde(default)]
    pub senses: Vec<RawSense>,
    #[serde(default)]
    pub url: Option<String>,
}

fn term_value<'a>(terms: &'a TermMap, language: &str) -> Option<&'a str> {
    terms.get(language).and_then(|t| t.value.as_deref())
}

impl RawLexeme {
    /// Reduce to a [`LexicalEntry`] in `language`.
    ///
    /// Returns `None` when the lexeme has no lemma in that language.
    /// `combined_text` is the lemma, then every form, then every gloss,
    /// separated by single spaces.
    pub fn simplify(&self, language: &str) -> Option<LexicalEntry> {
        if !self.lemmas.contains_key(language) {
            return None;
        }

        let lemma = term_value(&self.lemmas, language).unwrap_or_default().to_string();
        let forms: Vec<String> = self
            .forms
            .iter()
            .filter_map(|f| term_value(&f.representations, language))
            .map(str::to_string)
            .collect();
        let senses: Vec<String> = self
            .senses
            .iter()
            .filter_map(|s| term_value(&s.glosses, language))
            .map(str::to_string)
            .collect();

        let mut combined_text = lemma.clone();
        for part in forms.iter().chain(senses.iter()) {
            if !combined_text.is_empty() {
                combined_text.push(' ');
            }
            combined_text.push_str(part);
        }

        let id = self.id.clone().unwrap_or_default();
        let url = match (&self.url, &self.id) {
            (Some(url), _) => url.clone(),
            (None, Some(id)) => format!("{LEXEME_URL_PREFIX}{id}"),
            (None, None) => String::new(),
        };

        Some(LexicalEntry {
            id,
            language: language.to_string(),
            lemma,
            forms,
            senses,
            combined_text,
            url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAT: &str = r#"{
        "id": "L7",
        "lemmas": {"en": {"language": "en", "value": "cat"}},
        "forms": [
            {"representations": {"en": {"language": "en", "value": "cats"}}},
            {"representations": {"de": {"language": "de", "value": "Katzen"}}}
        ],
        "senses": [
            {"glosses": {"en": {"language": "en", "value": "domesticated feline"}}},
            {"glosses": {"fr": {"language": "fr", "value": "chat"}}}
        ]
    }"#;

    #[test]
    fn test_simplify_english_lexeme() {
        let raw: RawLexeme = serde_json::from_str(CAT).unwrap();
        let entry = raw.simplify("en").unwrap();

        assert_eq!(entry.id, "L7");
        assert_eq!(entry.language, "en");
        assert_eq!(entry.lemma, "cat");
        assert_eq!(entry.forms, vec!["cats"]);
        assert_eq!(entry.senses, vec!["domesticated feline"]);
        assert_eq!(entry.combined_text, "cat cats domesticated feline");
        assert_eq!(entry.url, "https://www.wikidata.org/wiki/Lexeme:L7");
        assert!(entry.is_eligible());
    }

    #[test]
    fn test_simplify_skips_without_lemma_in_language() {
        let raw: RawLexeme = serde_json::from_str(
            r#"{"id": "L9", "lemmas": {"fr": {"value": "chien"}}}"#,
        )
        .unwrap();
        assert!(raw.simplify("en").is_none());
        assert_eq!(raw.simplify("fr").unwrap().combined_text, "chien");
    }

    #[test]
    fn test_simplify_keeps_explicit_url() {
        let raw: RawLexeme = serde_json::from_str(
            r#"{"id": "L1", "url": "https://example.org/L1", "lemmas": {"en": {"value": "a"}}}"#,
        )
        .unwrap();
        assert_eq!(raw.simplify("en").unwrap().url, "https://example.org/L1");
    }

    #[test]
    fn test_simplify_lemma_without_value() {
        let raw: RawLexeme = serde_json::from_str(
            r#"{"id": "L2", "lemmas": {"en": {}}, "senses": [{"glosses": {"en": {"value": "gloss"}}}]}"#,
        )
        .unwrap();
        let entry = raw.simplify("en").unwrap();
        assert_eq!(entry.lemma, "");
        assert_eq!(entry.combined_text, "gloss");
    }
}
