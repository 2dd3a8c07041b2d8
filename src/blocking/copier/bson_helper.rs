use bson::document::{ValueAccessError, ValueAccessResult};
use bson::{Bson, Document};

/// Get a numeric value for this `key`, servers report counters and sizes as int32, int64 or
/// double depending on version and magnitude.
pub fn get_number(doc: &Document, key: &str) -> ValueAccessResult<f64> {
    match doc.get(key) {
        Some(Bson::Int32(v)) => Ok(*v as f64),
        Some(Bson::Int64(v)) => Ok(*v as f64),
        Some(Bson::Double(v)) => Ok(*v),
        Some(_) => Err(ValueAccessError::UnexpectedType),
        None => Err(ValueAccessError::NotPresent),
    }
}

/// Get a truthy value for this `key`, missing keys are false.
///
/// Old index definitions store flags like `background` as numbers.
pub fn get_flag(doc: &Document, key: &str) -> bool {
    match doc.get(key) {
        Some(Bson::Boolean(v)) => *v,
        Some(Bson::Int32(v)) => *v != 0,
        Some(Bson::Int64(v)) => *v != 0,
        Some(Bson::Double(v)) => *v != 0.0,
        _ => false,
    }
}
