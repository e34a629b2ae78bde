//! Validation helpers for DTOs.

use validator::ValidationError;

/// Length of the numeric join code shown to players.
pub const GAME_CODE_LEN: usize = 6;
/// Longest nickname accepted in a roster, counted in characters.
pub const NICKNAME_MAX_CHARS: usize = 32;

/// Validates that a game code is exactly six ASCII digits.
///
/// # Examples
///
/// ```ignore
/// validate_game_code("042917") // Ok
/// validate_game_code("42917")  // Err - too short
/// validate_game_code("04291a") // Err - not a digit
/// ```
pub fn validate_game_code(code: &str) -> Result<(), ValidationError> {
    if code.len() != GAME_CODE_LEN {
        let mut err = ValidationError::new("game_code_length");
        err.message = Some(
            format!(
                "Game code must be exactly {GAME_CODE_LEN} characters (got {})",
                code.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !code.chars().all(|c| c.is_ascii_digit()) {
        let mut err = ValidationError::new("game_code_format");
        err.message = Some("Game code must contain only digits".into());
        return Err(err);
    }

    Ok(())
}

/// Validates that a nickname is non-blank and not too long.
///
/// Nicknames are compared as typed, so no normalization happens here.
pub fn validate_nickname(nickname: &str) -> Result<(), ValidationError> {
    if nickname.trim().is_empty() {
        let mut err = ValidationError::new("nickname_blank");
        err.message = Some("Nickname must not be blank".into());
        return Err(err);
    }

    let chars = nickname.chars().count();
    if chars > NICKNAME_MAX_CHARS {
        let mut err = ValidationError::new("nickname_length");
        err.message = Some(
            format!("Nickname must be at most {NICKNAME_MAX_CHARS} characters (got {chars})")
                .into(),
        );
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_game_code_valid() {
        assert!(validate_game_code("000000").is_ok());
        assert!(validate_game_code("123456").is_ok());
    }

    #[test]
    fn test_validate_game_code_invalid() {
        assert!(validate_game_code("12345").is_err()); // too short
        assert!(validate_game_code("1234567").is_err()); // too long
        assert!(validate_game_code("").is_err()); // empty
        assert!(validate_game_code("12a456").is_err()); // letter
        assert!(validate_game_code("12 456").is_err()); // space
    }

    #[test]
    fn test_validate_nickname() {
        assert!(validate_nickname("Ada").is_ok());
        assert!(validate_nickname("   ").is_err());
        assert!(validate_nickname("").is_err());
        assert!(validate_nickname(&"x".repeat(NICKNAME_MAX_CHARS)).is_ok());
        assert!(validate_nickname(&"x".repeat(NICKNAME_MAX_CHARS + 1)).is_err());
    }
}
