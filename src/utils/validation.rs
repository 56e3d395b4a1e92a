use anyhow::{anyhow, Result};

pub const MIN_NAME_CHARS: usize = 2;
pub const MAX_NAME_CHARS: usize = 100;
pub const MIN_PHONE_DIGITS: usize = 10;

/// Validates a participant name and returns it trimmed.
pub fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();

    let length = name.chars().count();
    if length < MIN_NAME_CHARS {
        return Err(anyhow!(
            "Name must be at least {} characters long",
            MIN_NAME_CHARS
        ));
    }

    if length > MAX_NAME_CHARS {
        return Err(anyhow!(
            "Name cannot be longer than {} characters",
            MAX_NAME_CHARS
        ));
    }

    if name.contains('\n') || name.contains('\r') {
        return Err(anyhow!("Name cannot contain line breaks"));
    }

    Ok(name.to_string())
}

/// Validates a phone number by its digit count and returns it trimmed.
///
/// Separators are tolerated; only the digits are counted.
pub fn validate_phone(phone: &str) -> Result<String> {
    let phone = phone.trim();

    if phone.is_empty() {
        return Err(anyhow!("Phone number cannot be empty"));
    }

    let digits = phone.chars().filter(char::is_ascii_digit).count();
    if digits < MIN_PHONE_DIGITS {
        return Err(anyhow!(
            "Phone number must contain at least {} digits",
            MIN_PHONE_DIGITS
        ));
    }

    Ok(phone.to_string())
}

/// Parses a comma-separated list of Telegram user ids.
///
/// Blank entries are skipped; anything else that is not a positive integer
/// is an error naming the offending entry.
pub fn parse_user_ids(raw: &str) -> Result<Vec<i64>> {
    let mut ids = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let id: i64 = entry
            .parse()
            .map_err(|_| anyhow!("'{}' is not a valid user id", entry))?;
        if id <= 0 {
            return Err(anyhow!("'{}' is not a valid user id", entry));
        }
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}
