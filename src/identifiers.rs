// National identifiers
//
// A registry natural key is 16 digits: 4 for the municipality, 2 for the
// object type, 10 for a sequence number. Example: 0363 10 0012345678 is a
// building (pand) in municipality 0363.

use crate::entities::EntityType;
use crate::error::{Result, SyncError};

pub const KEY_LENGTH: usize = 16;

/// Object type encoded in a natural key, if the code is known
pub fn object_type_of(key: &str) -> Option<EntityType> {
    let code = key.get(4..6)?;
    EntityType::sync_order()
        .iter()
        .copied()
        .find(|t| t.type_code() == Some(code))
}

/// Check length, optional municipality prefix, and that the embedded type
/// code belongs to `expected`.
pub fn validate_natural_key(key: &str, expected: EntityType, municipality: Option<&str>) -> Result<()> {
    let entity = expected.name();

    if key.is_empty() {
        return Err(SyncError::malformed(entity, key, "identifier is empty"));
    }

    if key.len() != KEY_LENGTH || !key.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SyncError::malformed(
            entity,
            key,
            format!("identifier must be {} digits", KEY_LENGTH),
        ));
    }

    if let Some(prefix) = municipality {
        if !key.starts_with(prefix) {
            return Err(SyncError::malformed(
                entity,
                key,
                format!("municipality code {} is not {}", &key[..4], prefix),
            ));
        }
    }

    match object_type_of(key) {
        Some(found) if found == expected => Ok(()),
        _ => Err(SyncError::malformed(
            entity,
            key,
            format!("object type code {} is not {}", &key[4..6], entity),
        )),
    }
}

/// Prefix filter used by every reconciliation query
pub fn in_municipality(key: &str, prefix: &str) -> bool {
    key.starts_with(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_type_codes() {
        assert_eq!(object_type_of("0363100012345678"), Some(EntityType::Building));
        assert_eq!(object_type_of("0363200012345678"), Some(EntityType::AddressPoint));
        assert_eq!(object_type_of("0363300012345678"), Some(EntityType::PlaceName));
        assert_eq!(object_type_of("0363010012345678"), Some(EntityType::Unit));
        assert_eq!(object_type_of("0363020012345678"), Some(EntityType::Mooring));
        assert_eq!(object_type_of("0363030012345678"), Some(EntityType::Pitch));
        assert_eq!(object_type_of("0363990012345678"), None);
        assert_eq!(object_type_of("036"), None);
    }

    #[test]
    fn test_validate_natural_key() {
        assert!(validate_natural_key("0363100012345678", EntityType::Building, Some("0363")).is_ok());
        assert!(validate_natural_key("0457100012345678", EntityType::Building, None).is_ok());

        let wrong_length = validate_natural_key("03631000123", EntityType::Building, None);
        assert!(matches!(wrong_length, Err(SyncError::MalformedRecord { .. })));

        let wrong_town = validate_natural_key("0457100012345678", EntityType::Building, Some("0363"));
        assert!(wrong_town.unwrap_err().to_string().contains("municipality code 0457"));

        let wrong_type = validate_natural_key("0363010012345678", EntityType::Building, None);
        assert!(wrong_type.unwrap_err().to_string().contains("object type code 01"));

        assert!(validate_natural_key("", EntityType::Unit, None).is_err());
    }
}
