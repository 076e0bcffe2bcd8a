use crate::limits::*;
use crate::model::*;

use super::EngineError;

fn check_len(value: &str, (min, max): (usize, usize), msg: &'static str) -> Result<(), EngineError> {
    let n = value.chars().count();
    if n < min || n > max {
        return Err(EngineError::Invalid(msg));
    }
    Ok(())
}

fn check_price(price: f64) -> Result<(), EngineError> {
    if !price.is_finite() || price <= 0.0 || price > MAX_PRICE {
        return Err(EngineError::Invalid("price must be positive and at most 1000000"));
    }
    Ok(())
}

fn check_hour(hour: u8, msg: &'static str) -> Result<(), EngineError> {
    if hour > MAX_HOUR {
        return Err(EngineError::Invalid(msg));
    }
    Ok(())
}

fn check_guests(guests: u32, msg: &'static str) -> Result<(), EngineError> {
    if guests == 0 || guests > MAX_GUESTS {
        return Err(EngineError::Invalid(msg));
    }
    Ok(())
}

fn check_perks(perks: &[String]) -> Result<(), EngineError> {
    if perks.len() > MAX_PERKS {
        return Err(EngineError::Invalid("maximum 15 perks allowed"));
    }
    Ok(())
}

fn check_extra_info(extra: &str) -> Result<(), EngineError> {
    if extra.chars().count() > MAX_EXTRA_INFO_LEN {
        return Err(EngineError::Invalid("extra info is too long"));
    }
    Ok(())
}

pub(crate) fn validate_photos(urls: &[String]) -> Result<(), EngineError> {
    for url in urls {
        if url.trim().is_empty() {
            return Err(EngineError::Invalid("photo URL must not be empty"));
        }
        if url.len() > MAX_PHOTO_URL_LEN {
            return Err(EngineError::LimitExceeded("photo URL too long"));
        }
    }
    Ok(())
}

pub(crate) fn validate_place(place: &Place) -> Result<(), EngineError> {
    check_len(&place.title, TITLE_LEN, "title must be 3-50 characters")?;
    check_len(&place.address, ADDRESS_LEN, "address must be 5-200 characters")?;
    check_len(
        &place.description,
        DESCRIPTION_LEN,
        "description must be 10-100 characters",
    )?;
    check_perks(&place.perks)?;
    if let Some(ref extra) = place.extra_info {
        check_extra_info(extra)?;
    }
    check_hour(place.check_in_hour, "check-in must be between 0-23")?;
    check_hour(place.check_out_hour, "check-out must be between 0-23")?;
    check_guests(place.max_guests, "maximum guests must be between 1 and 50")?;
    check_price(place.price)?;
    if place.photos.len() > MAX_PHOTOS_PER_PLACE {
        return Err(EngineError::LimitExceeded("maximum 10 photos per place"));
    }
    validate_photos(&place.photos)
}

pub(crate) fn validate_patch(patch: &PlacePatch) -> Result<(), EngineError> {
    if patch.is_empty() {
        return Err(EngineError::Invalid(
            "at least one field must be provided for update",
        ));
    }
    if let Some(ref v) = patch.title {
        check_len(v, TITLE_LEN, "title must be 3-50 characters")?;
    }
    if let Some(ref v) = patch.address {
        check_len(v, ADDRESS_LEN, "address must be 5-200 characters")?;
    }
    if let Some(ref v) = patch.description {
        check_len(v, DESCRIPTION_LEN, "description must be 10-100 characters")?;
    }
    if let Some(ref v) = patch.perks {
        check_perks(v)?;
    }
    if let Some(ref v) = patch.extra_info {
        check_extra_info(v)?;
    }
    if let Some(v) = patch.check_in_hour {
        check_hour(v, "check-in must be between 0-23")?;
    }
    if let Some(v) = patch.check_out_hour {
        check_hour(v, "check-out must be between 0-23")?;
    }
    if let Some(v) = patch.max_guests {
        check_guests(v, "maximum guests must be between 1 and 50")?;
    }
    if let Some(v) = patch.price {
        check_price(v)?;
    }
    Ok(())
}

/// Field checks on a booking request. Date and capacity rules belong to the
/// resolver and are not repeated here.
pub(crate) fn validate_booking_fields(
    guests: u32,
    name: &str,
    phone: &str,
    price: f64,
) -> Result<(), EngineError> {
    check_guests(guests, "number of guests must be between 1 and 50")?;
    check_len(name, GUEST_NAME_LEN, "name must be 2-100 characters")?;
    let phone_ok = phone
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '-' | '+' | '(' | ')'));
    if !phone_ok {
        return Err(EngineError::Invalid("invalid phone number format"));
    }
    let (min, max) = PHONE_LEN;
    if phone.len() < min || phone.len() > max {
        return Err(EngineError::Invalid("phone number must be 10-20 characters"));
    }
    check_price(price)
}
