/// Defines `fn $name() -> &'static Regex`, compiling `$pat` once on first use.
#[macro_export]
macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static $crate::regex::Regex {
            static R: ::std::sync::OnceLock<$crate::regex::Regex> = ::std::sync::OnceLock::new();
            R.get_or_init(|| $crate::regex::Regex::new($pat).expect("invalid regex"))
        }
    };
}

#[doc(hidden)]
pub use regex;

pub mod config;
pub mod fields;
pub mod query;

pub use config::{AssistantConfig, ConfigError, MedrecConfig, OcrConfig, RecordsConfig};
pub use fields::{normalize_value, FieldMap, FieldName, NOT_FOUND};
pub use query::{validate_record_id, QueryField};
