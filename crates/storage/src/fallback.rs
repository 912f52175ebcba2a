//! Last-resort lookups straight from a document's recovered text, for fields the
//! extractor does not produce or could not find.

use medrec_core::{re, QueryField};
use regex::Regex;

re!(re_name, r"(?i)name:[ \t]*([^\r\n]+)");
re!(re_father, r"(?i)father(?:'s)? name:[ \t]*([^\r\n]+)");
re!(re_aadhar, r"(?i)aadhar(?: number)?:[ \t]*([^\r\n]+)");
re!(re_gender, r"(?i)gender:[ \t]*([^\r\n]+)");
re!(re_blood, r"(?i)blood(?: group)?:[ \t]*([^\r\n]+)");
re!(re_address, r"(?i)address:[ \t]*([^\r\n]+)");
re!(re_hospital, r"(?i)hospital(?: name)?:[ \t]*([^\r\n]+)");
re!(re_phone, r"(?i)(?:phone|contact)(?: number)?:[ \t]*([^\r\n]+)");
re!(re_disease, r"(?i)(?:disease|condition|diagnosis):[ \t]*([^\r\n]+)");
re!(re_medicines, r"(?i)(?:medicines|medications|drugs):[ \t]*([^\r\n]+)");
re!(re_bed, r"(?i)bed(?: number)?:[ \t]*([^\r\n]+)");
re!(re_amount, r"(?i)amount:[ \t]*([^\r\n]+)");
re!(re_charges, r"(?i)charges:[ \t]*([^\r\n]+)");

fn pattern(field: QueryField) -> &'static Regex {
    match field {
        QueryField::Name => re_name(),
        QueryField::Father => re_father(),
        QueryField::Aadhar => re_aadhar(),
        QueryField::Gender => re_gender(),
        QueryField::Blood => re_blood(),
        QueryField::Address => re_address(),
        QueryField::Hospital => re_hospital(),
        QueryField::Phone => re_phone(),
        QueryField::Disease => re_disease(),
        QueryField::Medicines => re_medicines(),
        QueryField::Bed => re_bed(),
        QueryField::Amount => re_amount(),
        QueryField::Charges => re_charges(),
    }
}

/// The trimmed rest of the first `Label:` line for `field`, if any.
pub fn find_in_text(text: &str, field: QueryField) -> Option<String> {
    let value = pattern(field).captures(text)?.get(1)?.as_str().trim();
    (!value.is_empty()).then(|| value.to_string())
}
