//! Adapters from the shared field rules to `validator` custom validators

use std::borrow::Cow;

use validator::ValidationError;

fn rule(code: &'static str, result: Result<(), &'static str>) -> Result<(), ValidationError> {
    result.map_err(|message| {
        let mut err = ValidationError::new(code);
        err.message = Some(Cow::Borrowed(message));
        err
    })
}

pub fn event_type(value: &str) -> Result<(), ValidationError> {
    rule("event_type", shared::validate_event_type(value))
}

pub fn tracking_number(value: &str) -> Result<(), ValidationError> {
    rule("tracking_number", shared::validate_tracking_number(value))
}

pub fn carrier_status_code(value: &str) -> Result<(), ValidationError> {
    rule("carrier_status_code", shared::validate_carrier_status_code(value))
}

pub fn country_code(value: &str) -> Result<(), ValidationError> {
    rule("country", shared::validate_country_code(value))
}

pub fn phone(value: &str) -> Result<(), ValidationError> {
    rule("phone", shared::validate_phone(value))
}

pub fn payment_reference(value: &str) -> Result<(), ValidationError> {
    rule("payment_reference", shared::validate_payment_reference(value))
}
