use medrec_core::{normalize_value, re, FieldMap, FieldName};
use regex::Regex;

// Line fields read the rest of the label's own line.
re!(re_name,
    r"(?i)(?:\b(?P<qualifier>[a-z]+)(?:'s)?[ \t]+)?\bname[ \t]*:[ \t]*(?P<value>[^\r\n]+)");
re!(re_age,
    r"(?i)\bage[ \t]*:[ \t]*(\d+)");
// The value may sit on the line after its label, but is never itself a label.
re!(re_patient_id,
    r"(?i)(?:\b(?:insurance|patient|record)[ \t]*)?\bid\b[ \t]*[:#]?[ \t]*(?:\r?\n[ \t]*)?([A-Z0-9-]+)(?:[^:A-Z0-9-]|$)");
re!(re_disease,
    r"(?i)\b(?:disease|diagnosis)[ \t]*(?:name)?[ \t]*:[ \t]*([^\r\n]+)");
re!(re_gender,
    r"(?i)\bgender[ \t]*:[ \t]*([^\r\n]+)");
re!(re_blood,
    r"(?i)\bblood(?:[ \t]+group)?[ \t]*:[ \t]*([^\r\n]+)");
re!(re_phone,
    r"(?i)\b(?:phone|contact)[ \t]*(?:number)?[ \t]*:[ \t]*([^\r\n]+)");

// Block fields: a start label, then everything up to the first stop match.
re!(re_address_start,
    r"(?i)\baddress[ \t]*:");
re!(re_address_stop,
    r"(?im)^[ \t]*(?:(?:patient|insurance|record)[ \t]+)?(?:name|age|id|disease|diagnosis|gender|blood|address|phone|contact|medications?)\b");
re!(re_medicines_start,
    r"(?i)\bmedications?[ \t]*:");
re!(re_medicines_stop,
    r"\n[ \t]*\r?\n|\n[ \t]*[A-Z][a-z]+(?:[ \t][A-Z][a-z]+)?[ \t]*:");

// ── Rules ─────────────────────────────────────────────────────────────────────

/// How a rule locates its raw value in the text.
#[derive(Clone, Copy)]
pub enum Matcher {
    /// First match of the pattern; the value is capture group 1.
    Line(fn() -> &'static Regex),
    /// Like `Line`, but the pattern's `qualifier` group names the word before
    /// the label. Matches qualified by one of `excluded` (any case) belong to
    /// another field and are skipped. The value is the `value` group.
    Qualified {
        pattern: fn() -> &'static Regex,
        excluded: &'static [&'static str],
    },
    /// Value runs from the end of `start` up to the first `stop` match after
    /// it, or to the end of the text.
    Block {
        start: fn() -> &'static Regex,
        stop: fn() -> &'static Regex,
    },
}

impl Matcher {
    fn find<'t>(&self, text: &'t str) -> Option<&'t str> {
        match *self {
            Matcher::Line(pattern) => Some(pattern().captures(text)?.get(1)?.as_str()),
            Matcher::Qualified { pattern, excluded } => pattern()
                .captures_iter(text)
                .find(|caps| {
                    caps.name("qualifier")
                        .map_or(true, |q| !excluded.iter().any(|e| q.as_str().eq_ignore_ascii_case(e)))
                })?
                .name("value")
                .map(|m| m.as_str()),
            Matcher::Block { start, stop } => {
                let from = start().find(text)?.end();
                let to = stop().find_at(text, from).map_or(text.len(), |m| m.start());
                Some(&text[from..to])
            }
        }
    }
}

/// One field's extraction rule: where to look, and how to clean up what was found.
#[derive(Clone, Copy)]
pub struct FieldRule {
    pub field: FieldName,
    pub matcher: Matcher,
    pub post: fn(&str) -> String,
}

impl FieldRule {
    pub const fn new(field: FieldName, matcher: Matcher) -> Self {
        Self { field, matcher, post: normalize_value }
    }

    /// The cleaned value for this rule, or `None` when the label is absent.
    pub fn apply(&self, text: &str) -> Option<String> {
        self.matcher.find(text).map(self.post)
    }
}

/// Words that turn "Name:" into some other person's or thing's name.
const OTHER_NAMES: &[&str] = &["disease", "father", "mother", "guardian", "hospital", "doctor", "insurance"];

const STANDARD_RULES: [FieldRule; 9] = [
    FieldRule::new(
        FieldName::Name,
        Matcher::Qualified { pattern: re_name, excluded: OTHER_NAMES },
    ),
    FieldRule::new(FieldName::Age, Matcher::Line(re_age)),
    FieldRule::new(FieldName::PatientId, Matcher::Line(re_patient_id)),
    FieldRule::new(FieldName::Disease, Matcher::Line(re_disease)),
    FieldRule::new(FieldName::Gender, Matcher::Line(re_gender)),
    FieldRule::new(FieldName::Blood, Matcher::Line(re_blood)),
    FieldRule::new(
        FieldName::Address,
        Matcher::Block { start: re_address_start, stop: re_address_stop },
    ),
    FieldRule::new(FieldName::Phone, Matcher::Line(re_phone)),
    FieldRule::new(
        FieldName::Medicines,
        Matcher::Block { start: re_medicines_start, stop: re_medicines_stop },
    ),
];

// ── Public extraction API ─────────────────────────────────────────────────────

/// Applies an independent rule per field to recovered document text.
pub struct FieldExtractor {
    rules: Vec<FieldRule>,
}

impl Default for FieldExtractor {
    fn default() -> Self {
        Self { rules: STANDARD_RULES.to_vec() }
    }
}

impl FieldExtractor {
    pub fn with_rules(rules: Vec<FieldRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[FieldRule] {
        &self.rules
    }

    /// Extract every field. Fields without a rule, or whose rule finds nothing,
    /// hold the "Not found" sentinel.
    pub fn extract(&self, text: &str) -> FieldMap {
        let mut fields = FieldMap::new();
        for rule in &self.rules {
            if let Some(value) = rule.apply(text) {
                fields.set(rule.field, &value);
            }
        }
        fields
    }
}

/// Extract with the standard rule set.
pub fn extract_fields(text: &str) -> FieldMap {
    FieldExtractor::default().extract(text)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
