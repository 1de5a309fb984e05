const MAX_CHAR_LENGHT: usize = 32;
const MIN_DIGITS: usize = 5;
const ALLOWED_SEPARATORS: [char; 6] = ['+', '-', ' ', '(', ')', '.'];

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(transparent)]
pub struct SubscriberPhone(String);

impl SubscriberPhone {
    pub fn parse(phone: String) -> Result<SubscriberPhone, String> {
        let phone = phone.trim().to_string();
        let is_too_long = phone.chars().count() > MAX_CHAR_LENGHT;
        let has_invalid_chars = phone
            .chars()
            .any(|char| !char.is_ascii_digit() && !ALLOWED_SEPARATORS.contains(&char));
        let digits = phone.chars().filter(char::is_ascii_digit).count();

        if is_too_long || has_invalid_chars || digits < MIN_DIGITS {
            return Err(format!("{} is not a valid phone number", phone));
        }

        Ok(Self(phone))
    }
}

impl AsRef<str> for SubscriberPhone {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
