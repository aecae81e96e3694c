use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Characters left untouched by `encodeURIComponent`.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Same as [`COMPONENT`] but `~ ! ( ) '` are encoded too, so that no escaped
/// tag or value can contain a grammar delimiter.
const SAFE_COMPONENT: &AsciiSet = &COMPONENT
    .add(b'~')
    .add(b'!')
    .add(b'(')
    .add(b')')
    .add(b'\'');

pub fn escape(value: &str) -> String {
    utf8_percent_encode(value, SAFE_COMPONENT).to_string()
}

pub fn escape_component(value: &str) -> String {
    utf8_percent_encode(value, COMPONENT).to_string()
}

pub fn unescape(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}
