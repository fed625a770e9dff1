use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ParseError;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn parse(s: &str) -> Result<Self, ParseError> {
                Uuid::parse_str(s.trim())
                    .map(Self)
                    .map_err(|_| ParseError::InvalidId(s.to_string()))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Phone-number identity holding OTP state.
    CredentialId
);
uuid_id!(
    /// Public user profile, one per credential.
    ProfileId
);
uuid_id!(
    /// Chat group, also the realtime room key.
    GroupId
);
uuid_id!(MessageId);

/// Platform-wide role carried by a profile.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Admin,
    Candidate,
    Volunteer,
    #[default]
    Voter,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Candidate => "CANDIDATE",
            Role::Volunteer => "VOLUNTEER",
            Role::Voter => "VOTER",
        }
    }
}

impl FromStr for Role {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ADMIN" => Ok(Role::Admin),
            "CANDIDATE" => Ok(Role::Candidate),
            "VOLUNTEER" => Ok(Role::Volunteer),
            "VOTER" => Ok(Role::Voter),
            _ => Err(ParseError::UnknownVariant {
                kind: "role",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    #[default]
    Active,
    Blocked,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Blocked => "blocked",
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, AccountStatus::Blocked)
    }
}

impl FromStr for AccountStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(AccountStatus::Active),
            "blocked" => Ok(AccountStatus::Blocked),
            _ => Err(ParseError::UnknownVariant {
                kind: "account status",
                value: s.to_string(),
            }),
        }
    }
}

/// A member's role inside one group.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GroupRole {
    Admin,
    Member,
}

impl GroupRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupRole::Admin => "admin",
            GroupRole::Member => "member",
        }
    }
}

impl FromStr for GroupRole {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(GroupRole::Admin),
            "member" => Ok(GroupRole::Member),
            _ => Err(ParseError::UnknownVariant {
                kind: "group role",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[default]
    Text,
    Image,
    File,
    System,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Image => "image",
            ContentType::File => "file",
            ContentType::System => "system",
        }
    }
}

impl FromStr for ContentType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(ContentType::Text),
            "image" => Ok(ContentType::Image),
            "file" => Ok(ContentType::File),
            "system" => Ok(ContentType::System),
            _ => Err(ParseError::UnknownVariant {
                kind: "content type",
                value: s.to_string(),
            }),
        }
    }
}

/// Normalise a phone number for use as an identity key.
///
/// Keeps a leading `+` and digits only; separators such as spaces, dashes,
/// dots and parentheses are dropped. Returns `None` when fewer than seven
/// digits remain or anything else is present.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let mut out = String::with_capacity(trimmed.len());
    for (i, c) in trimmed.chars().enumerate() {
        match c {
            '+' if i == 0 => out.push(c),
            '0'..='9' => out.push(c),
            ' ' | '-' | '.' | '(' | ')' => {}
            _ => return None,
        }
    }
    let digits = out.chars().filter(|c| c.is_ascii_digit()).count();
    if !(7..=15).contains(&digits) {
        return None;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_and_display() {
        assert_eq!("volunteer".parse::<Role>().unwrap(), Role::Volunteer);
        assert_eq!(Role::Candidate.to_string(), "CANDIDATE");
        assert!("mayor".parse::<Role>().is_err());
        assert_eq!(Role::default(), Role::Voter);
    }

    #[test]
    fn test_role_serde_uppercase() {
        let json = serde_json::to_string(&Role::Admin).unwrap();
        assert_eq!(json, "\"ADMIN\"");
    }

    #[test]
    fn test_id_parse_rejects_garbage() {
        assert!(GroupId::parse("G1").is_err());
        let id = GroupId::new();
        assert_eq!(GroupId::parse(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("555-123-4567").as_deref(), Some("5551234567"));
        assert_eq!(normalize_phone(" +1 (555) 123 4567 ").as_deref(), Some("+15551234567"));
        assert_eq!(normalize_phone("12345"), None);
        assert_eq!(normalize_phone("555abc1234"), None);
        assert_eq!(normalize_phone(""), None);
    }
}
