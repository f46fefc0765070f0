use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Characters left as is in a table path segment.
///
/// `.` and `-` are encoded too, so no name can form `.` or `..` and the
/// result matches the keys the backup writer produced.
const TABLE_PATH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'~')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b':')
    .remove(b'=')
    .remove(b'@');

/// Escapes a database or table name for use as a single path segment.
pub fn table_path_encode(name: &str) -> String {
    utf8_percent_encode(name, TABLE_PATH_ENCODE_SET).to_string()
}
