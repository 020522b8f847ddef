//! Input validation helpers for delivery and invoicing requests

// ============================================================================
// Tracking Validations
// ============================================================================

/// Validate a tracking event type: lower snake_case, 1-50 characters
pub fn validate_event_type(event_type: &str) -> Result<(), &'static str> {
    if event_type.is_empty() || event_type.len() > 50 {
        return Err("Event type must be between 1 and 50 characters");
    }
    if !event_type
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err("Event type must be lower snake_case");
    }
    if event_type.starts_with('_') || event_type.ends_with('_') {
        return Err("Event type cannot start or end with an underscore");
    }
    Ok(())
}

/// Validate a carrier tracking number (4-64 chars, alphanumeric and dashes)
pub fn validate_tracking_number(tracking_number: &str) -> Result<(), &'static str> {
    let trimmed = tracking_number.trim();
    if trimmed.len() < 4 || trimmed.len() > 64 {
        return Err("Tracking number must be between 4 and 64 characters");
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        return Err("Tracking number may only contain letters, digits and dashes");
    }
    Ok(())
}

/// Validate a carrier status code reported by a carrier integration
pub fn validate_carrier_status_code(code: &str) -> Result<(), &'static str> {
    if code.is_empty() || code.len() > 32 {
        return Err("Carrier status code must be between 1 and 32 characters");
    }
    if code.chars().any(|c| c.is_whitespace()) {
        return Err("Carrier status code cannot contain whitespace");
    }
    Ok(())
}

// ============================================================================
// Reference Data Validations
// ============================================================================

/// Validate ISO 3166-1 alpha-2 country code
pub fn validate_country_code(code: &str) -> Result<(), &'static str> {
    if code.len() != 2 || !code.chars().all(|c| c.is_ascii_uppercase()) {
        return Err("Country must be a two-letter ISO code");
    }
    Ok(())
}

/// Validate a contact phone number (7-15 digits, optional leading +)
pub fn validate_phone(phone: &str) -> Result<(), &'static str> {
    let trimmed = phone.trim();
    let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);
    if !digits
        .chars()
        .all(|c| c.is_ascii_digit() || c == ' ' || c == '-')
    {
        return Err("Phone number may only contain digits, spaces and dashes");
    }
    let count = digits.chars().filter(|c| c.is_ascii_digit()).count();
    if !(7..=15).contains(&count) {
        return Err("Phone number must contain between 7 and 15 digits");
    }
    Ok(())
}

// ============================================================================
// Invoicing Validations
// ============================================================================

/// Validate a payment reference (1-100 printable characters)
pub fn validate_payment_reference(reference: &str) -> Result<(), &'static str> {
    let trimmed = reference.trim();
    if trimmed.is_empty() {
        return Err("Payment reference cannot be empty");
    }
    if trimmed.len() > 100 {
        return Err("Payment reference must be at most 100 characters");
    }
    if trimmed.chars().any(|c| c.is_control()) {
        return Err("Payment reference contains invalid characters");
    }
    Ok(())
}

/// Validate that a due date does not precede the invoice date
pub fn validate_due_date(
    invoice_date: chrono::NaiveDate,
    due_date: chrono::NaiveDate,
) -> Result<(), &'static str> {
    if due_date < invoice_date {
        return Err("Due date cannot be before the invoice date");
    }
    Ok(())
}
