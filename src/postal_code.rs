use crate::types::Field;

/// German postal codes (PLZ) are always five characters
pub const POSTAL_CODE_LEN: usize = 5;

/// City lookups need more than this many characters
const MIN_CITY_QUERY_LEN: usize = 2;

/// Check whether a postal code is long enough to be looked up
pub fn is_complete(code: &str) -> bool {
    code.chars().count() == POSTAL_CODE_LEN
}

/// Check whether a city name is long enough to be looked up
pub fn is_city_query(name: &str) -> bool {
    name.chars().count() > MIN_CITY_QUERY_LEN
}

/// Whether a settled value of `field` should fire a lookup
pub fn triggers_lookup(field: Field, value: &str) -> bool {
    match field {
        Field::City => is_city_query(value),
        Field::PostalCode => is_complete(value),
    }
}

/// Cut raw postal code input down to the field's maximum length
pub fn clamp(raw: &str) -> String {
    raw.chars().take(POSTAL_CODE_LEN).collect()
}
