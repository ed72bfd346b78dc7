//! Ordered INI documents.
//!
//! The format is the loose one the game and its tools agree on: `=` is the
//! only delimiter, bare keys are allowed, `#` and `;` start full-line
//! comments and indented lines continue the previous value. Duplicate
//! sections merge and duplicate keys keep the last value. Anything that
//! cannot be placed (a key before the first header, an empty key, an
//! unterminated header) fails the whole document.

use std::fmt::Write;
use tracing::warn;

/// How option keys are stored and looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCase {
    /// Keys are folded to lower case on read, set and lookup.
    Fold,
    /// Keys are kept exactly as written.
    Preserve,
}

impl KeyCase {
    pub fn apply(self, key: &str) -> String {
        match self {
            KeyCase::Fold => key.to_lowercase(),
            KeyCase::Preserve => key.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    name: String,
    options: Vec<(String, Option<String>)>,
}

impl Section {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            options: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.options.iter().map(|(key, _)| key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.options
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_deref()))
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    fn get(&self, key: &str) -> Option<Option<&str>> {
        self.options
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_deref())
    }

    fn set(&mut self, key: String, value: Option<String>) {
        match self.options.iter_mut().find(|(existing, _)| *existing == key) {
            Some(slot) => slot.1 = value,
            None => self.options.push((key, value)),
        }
    }

    fn remove(&mut self, key: &str) -> Option<Option<String>> {
        let index = self.options.iter().position(|(existing, _)| existing == key)?;
        Some(self.options.remove(index).1)
    }

    fn value_mut(&mut self, key: &str) -> Option<&mut Option<String>> {
        self.options
            .iter_mut()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    key_case: KeyCase,
    sections: Vec<Section>,
}

impl Document {
    pub fn new(key_case: KeyCase) -> Self {
        Self {
            key_case,
            sections: Vec::new(),
        }
    }

    pub fn parse(text: &str, key_case: KeyCase) -> Result<Self, ParseError> {
        let mut doc = Document::new(key_case);
        let mut current: Option<usize> = None;
        let mut last_key: Option<String> = None;
        // blank lines seen since the last value line; kept only if the value continues
        let mut blank_run = 0;

        for (index, raw) in text.lines().enumerate() {
            let line_no = index + 1;
            let trimmed = raw.trim();

            if trimmed.is_empty() {
                if last_key.is_some() {
                    blank_run += 1;
                }
                continue;
            }

            let indented = raw.starts_with(' ') || raw.starts_with('\t');
            if indented {
                if let (Some(section), Some(key)) = (current, last_key.as_deref()) {
                    if let Some(Some(value)) = doc.sections[section].value_mut(key) {
                        for _ in 0..=blank_run {
                            value.push('\n');
                        }
                        value.push_str(trimmed);
                        blank_run = 0;
                        continue;
                    }
                }
            }
            blank_run = 0;

            if trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }

            if trimmed.starts_with('[') {
                match trimmed.rfind(']') {
                    Some(end) if end > 1 => {
                        current = Some(doc.section_index_or_insert(&trimmed[1..end]));
                        last_key = None;
                        continue;
                    }
                    // inside a section an unclosed bracket starts an ordinary option
                    _ if current.is_some() => {}
                    _ => {
                        return Err(ParseError {
                            line: line_no,
                            reason: format!("malformed section header '{trimmed}'"),
                        })
                    }
                }
            }

            let Some(section) = current else {
                return Err(ParseError {
                    line: line_no,
                    reason: "option found before any section header".to_string(),
                });
            };

            let (key, value) = match trimmed.split_once('=') {
                Some((key, value)) => (key.trim(), Some(value.trim().to_string())),
                None => (trimmed, None),
            };
            if key.is_empty() {
                return Err(ParseError {
                    line: line_no,
                    reason: "option without a name".to_string(),
                });
            }

            let key = key_case.apply(key);
            doc.sections[section].set(key.clone(), value);
            last_key = Some(key);
        }

        Ok(doc)
    }

    /// Renders the document as UTF-8 text with `key=value` lines.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            let _ = writeln!(out, "[{}]", section.name);
            for (key, value) in &section.options {
                match value {
                    Some(value) => {
                        let _ = writeln!(out, "{key}={}", value.replace('\n', "\n\t"));
                    }
                    None => {
                        let _ = writeln!(out, "{key}");
                    }
                }
            }
            out.push('\n');
        }
        out
    }

    pub fn key_case(&self) -> KeyCase {
        self.key_case
    }

    pub fn clear(&mut self) {
        self.sections.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn section_names(&self) -> Vec<String> {
        self.sections.iter().map(|section| section.name.clone()).collect()
    }

    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter()
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|section| section.name == name)
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.section(name).is_some()
    }

    /// Appends an empty section unless one with this name exists. Returns
    /// false for a name that cannot be written as a header.
    pub fn add_section(&mut self, name: &str) -> bool {
        if !is_storable_section(name) {
            warn!("refusing section name {name:?}");
            return false;
        }
        self.section_index_or_insert(name);
        true
    }

    pub fn remove_section(&mut self, name: &str) -> Option<Section> {
        let index = self.sections.iter().position(|section| section.name == name)?;
        Some(self.sections.remove(index))
    }

    /// `None` when the section or option is missing, `Some(None)` for a bare key.
    pub fn get(&self, section: &str, key: &str) -> Option<Option<&str>> {
        let key = self.key_case.apply(key);
        self.section(section)?.get(&key)
    }

    pub fn has_option(&self, section: &str, key: &str) -> bool {
        self.get(section, key).is_some()
    }

    /// Sets an option, creating the section. Values are stored the way they
    /// read back: lines trimmed, trailing blank lines dropped. Returns false,
    /// leaving the document untouched, when the pair would not survive a
    /// save and reload.
    pub fn set(&mut self, section: &str, key: &str, value: Option<String>) -> bool {
        let value = value.map(|value| normalize_value(&value));
        if !is_storable_section(section) || !is_storable_option(key, value.as_deref()) {
            warn!("refusing option {key:?} in section {section:?}");
            return false;
        }
        let key = self.key_case.apply(key);
        let index = self.section_index_or_insert(section);
        self.sections[index].set(key, value);
        true
    }

    pub fn remove_option(&mut self, section: &str, key: &str) -> Option<Option<String>> {
        let key = self.key_case.apply(key);
        let index = self.sections.iter().position(|s| s.name == section)?;
        self.sections[index].remove(&key)
    }

    /// Copy of the document with every key passed through `transform`.
    /// Keys that collide after the transform keep the later value.
    pub fn map_keys(&self, transform: impl Fn(&str) -> String) -> Document {
        let mut out = Document::new(KeyCase::Preserve);
        for section in &self.sections {
            let index = out.section_index_or_insert(&section.name);
            for (key, value) in &section.options {
                out.sections[index].set(transform(key), value.clone());
            }
        }
        out
    }

    fn section_index_or_insert(&mut self, name: &str) -> usize {
        if let Some(index) = self.sections.iter().position(|section| section.name == name) {
            return index;
        }
        self.sections.push(Section::new(name));
        self.sections.len() - 1
    }
}

fn is_storable_section(name: &str) -> bool {
    !name.is_empty() && !name.contains(['\n', '\r'])
}

/// Whether `key` (with `value`) renders to a line that parses back as the
/// same option.
fn is_storable_option(key: &str, value: Option<&str>) -> bool {
    if key.is_empty() || key != key.trim() || key.contains(['=', '\n', '\r']) {
        return false;
    }
    if key.starts_with('#') || key.starts_with(';') {
        return false;
    }
    // `[key=value]` would read back as a section header
    if key.starts_with('[') {
        let first_line = value.and_then(|value| value.lines().next()).unwrap_or("");
        return !key.contains(']') && !first_line.contains(']');
    }
    true
}

fn normalize_value(value: &str) -> String {
    let lines: Vec<&str> = value.lines().map(str::trim).collect();
    let end = lines
        .iter()
        .rposition(|line| !line.is_empty())
        .map_or(0, |last| last + 1);
    lines[..end].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sections_bare_keys_and_comments() {
        let text = "; leading comment\n[PATHS]\nDocuments = /home/user/docs\nscriptmerger=\n\n[TOOLBAR]\nopen_log\n# trailing\n";
        let doc = Document::parse(text, KeyCase::Fold).unwrap();

        assert_eq!(doc.section_names(), vec!["PATHS", "TOOLBAR"]);
        assert_eq!(doc.get("PATHS", "documents"), Some(Some("/home/user/docs")));
        assert_eq!(doc.get("PATHS", "DOCUMENTS"), Some(Some("/home/user/docs")));
        assert_eq!(doc.get("PATHS", "scriptmerger"), Some(Some("")));
        assert_eq!(doc.get("TOOLBAR", "open_log"), Some(None));
        assert_eq!(doc.get("TOOLBAR", "missing"), None);
    }

    #[test]
    fn only_equals_splits_options() {
        let doc = Document::parse("[PATHS]\ngamelaunchcommand=C:\\run.bat a=b\nurl: x\n", KeyCase::Fold)
            .unwrap();
        assert_eq!(
            doc.get("PATHS", "gamelaunchcommand"),
            Some(Some("C:\\run.bat a=b"))
        );
        assert_eq!(doc.get("PATHS", "url: x"), Some(None));
    }

    #[test]
    fn duplicate_sections_merge_and_last_key_wins() {
        let text = "[mod_A]\nenabled=1\n[mod_B]\npriority=2\n[mod_A]\nenabled=0\npriority=5\n";
        let doc = Document::parse(text, KeyCase::Fold).unwrap();
        assert_eq!(doc.section_names(), vec!["mod_A", "mod_B"]);
        assert_eq!(doc.get("mod_A", "enabled"), Some(Some("0")));
        assert_eq!(doc.get("mod_A", "priority"), Some(Some("5")));
    }

    #[test]
    fn preserves_key_case_when_asked() {
        let doc = Document::parse("[Rendering]\nMotionBlur=false\n", KeyCase::Preserve).unwrap();
        let keys: Vec<&str> = doc.section("Rendering").unwrap().keys().collect();
        assert_eq!(keys, vec!["MotionBlur"]);
        assert_eq!(doc.get("Rendering", "motionblur"), None);
    }

    #[test]
    fn doubled_brackets_survive_as_section_name() {
        let doc = Document::parse("[[Gameplay]]\nA=1\n", KeyCase::Preserve).unwrap();
        assert_eq!(doc.section_names(), vec!["[Gameplay]"]);
    }

    #[test]
    fn continuation_lines_extend_values() {
        let doc = Document::parse("[S]\nkey=first\n\tsecond\n", KeyCase::Fold).unwrap();
        assert_eq!(doc.get("S", "key"), Some(Some("first\nsecond")));
        assert_eq!(doc.render(), "[S]\nkey=first\n\tsecond\n\n");
    }

    #[test]
    fn rejects_option_before_header() {
        let err = Document::parse("orphan=1\n[S]\n", KeyCase::Fold).unwrap_err();
        assert_eq!(err.line, 1);
    }

    #[test]
    fn rejects_unterminated_header_and_empty_key() {
        assert!(Document::parse("[PATHS\nx=1\n", KeyCase::Fold).is_err());
        assert!(Document::parse("[]\n", KeyCase::Fold).is_err());
        let err = Document::parse("[S]\n=value\n", KeyCase::Fold).unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn unclosed_bracket_inside_section_is_an_option() {
        let text = "[TOOLBAR]\n[custom tool\n[launch=fast\n[PATHS]\ndocuments=/docs\n";
        let doc = Document::parse(text, KeyCase::Fold).unwrap();
        assert_eq!(doc.section_names(), vec!["TOOLBAR", "PATHS"]);
        assert_eq!(doc.get("TOOLBAR", "[custom tool"), Some(None));
        assert_eq!(doc.get("TOOLBAR", "[launch"), Some(Some("fast")));
        assert_eq!(doc.get("PATHS", "documents"), Some(Some("/docs")));
    }

    #[test]
    fn bracket_keys_survive_render_and_reload() {
        let mut doc = Document::new(KeyCase::Fold);
        assert!(doc.set("TOOLBAR", "[custom tool", None));
        assert!(doc.set("PATHS", "documents", Some("/docs".to_string())));

        let reparsed = Document::parse(&doc.render(), KeyCase::Fold).unwrap();
        assert_eq!(reparsed, doc);
        assert_eq!(reparsed.get("PATHS", "documents"), Some(Some("/docs")));
    }

    #[test]
    fn keys_that_would_not_reload_are_refused() {
        let mut doc = Document::new(KeyCase::Fold);
        for key in ["a=b", "#hidden", ";hidden", "[x]", " padded", "two\nlines", ""] {
            assert!(!doc.set("TOOLBAR", key, None), "{key:?} was stored");
        }
        assert!(!doc.set("TOOLBAR", "[x", Some("y]".to_string())));
        assert!(!doc.set("", "key", None));
        assert!(!doc.add_section("two\nlines"));
        assert!(doc.is_empty());
    }

    #[test]
    fn blank_lines_inside_a_value_are_kept() {
        let mut doc = Document::new(KeyCase::Fold);
        assert!(doc.set("PATHS", "gamelaunchcommand", Some("run\n\n--fast\n".to_string())));
        assert_eq!(doc.get("PATHS", "gamelaunchcommand"), Some(Some("run\n\n--fast")));

        let text = doc.render();
        assert_eq!(text, "[PATHS]\ngamelaunchcommand=run\n\t\n\t--fast\n\n");
        assert_eq!(Document::parse(&text, KeyCase::Fold).unwrap(), doc);
    }

    #[test]
    fn blank_line_after_a_value_does_not_leak_into_it() {
        let doc = Document::parse("[S]\nkey=first\n\nother=2\n", KeyCase::Fold).unwrap();
        assert_eq!(doc.get("S", "key"), Some(Some("first")));
        assert_eq!(doc.get("S", "other"), Some(Some("2")));
    }

    #[test]
    fn comment_characters_in_continuation_lines_are_value_text() {
        let mut doc = Document::new(KeyCase::Fold);
        assert!(doc.set("S", "script", Some("run\n# not a comment\n;nor this".to_string())));
        let reparsed = Document::parse(&doc.render(), KeyCase::Fold).unwrap();
        assert_eq!(
            reparsed.get("S", "script"),
            Some(Some("run\n# not a comment\n;nor this"))
        );
    }

    #[test]
    fn render_keeps_insertion_order_and_bare_keys() {
        let mut doc = Document::new(KeyCase::Fold);
        doc.set("WINDOW", "width", Some("1024".to_string()));
        doc.set("WINDOW", "height", Some("720".to_string()));
        doc.add_section("TOOLBAR");
        doc.set("PATHS", "lastpath", None);
        doc.set("WINDOW", "Width", Some("800".to_string()));

        assert_eq!(
            doc.render(),
            "[WINDOW]\nwidth=800\nheight=720\n\n[TOOLBAR]\n\n[PATHS]\nlastpath\n\n"
        );
        let reparsed = Document::parse(&doc.render(), KeyCase::Fold).unwrap();
        assert_eq!(reparsed, doc);
    }

    #[test]
    fn map_keys_leaves_source_untouched() {
        let mut doc = Document::new(KeyCase::Fold);
        doc.set("mod_Foo", "enabled", Some("1".to_string()));
        let upper = doc.map_keys(|key| key.to_uppercase());
        assert_eq!(upper.get("mod_Foo", "ENABLED"), Some(Some("1")));
        assert_eq!(doc.get("mod_Foo", "enabled"), Some(Some("1")));
        assert_eq!(doc.render(), "[mod_Foo]\nenabled=1\n\n");
    }

    #[test]
    fn remove_option_and_section() {
        let mut doc = Document::parse("[TOOLBAR]\na\nb\n[X]\n", KeyCase::Fold).unwrap();
        assert_eq!(doc.remove_option("TOOLBAR", "A"), Some(None));
        assert_eq!(doc.remove_option("TOOLBAR", "a"), None);
        assert!(doc.remove_section("X").is_some());
        assert_eq!(doc.render(), "[TOOLBAR]\nb\n\n");
    }
}
