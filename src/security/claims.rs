use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UserClaims {
    /// User ID. Issued as a string or a number.
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    /// Standard subject claim, accepted when `id` is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub exp: usize, // Expiration time (UNIX timestamp)
}

impl UserClaims {
    /// The caller's user id, preferring `id` over `sub`. Blank ids count as missing.
    pub fn user_id(&self) -> Option<&str> {
        self.id
            .as_deref()
            .or(self.sub.as_deref())
            .filter(|id| !id.trim().is_empty())
    }
}

/// Verified caller, inserted into request extensions by the auth middleware.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserContext {
    pub user_id: String,
    pub email: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IdClaim {
    Text(String),
    Number(serde_json::Number),
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<IdClaim>::deserialize(deserializer)?.map(|id| match id {
        IdClaim::Text(s) => s,
        IdClaim::Number(n) => n.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_id_becomes_string() {
        let claims: UserClaims = serde_json::from_value(json!({ "id": 42, "exp": 1 })).unwrap();
        assert_eq!(claims.user_id(), Some("42"));
    }

    #[test]
    fn test_sub_fallback_and_blank_id() {
        let claims: UserClaims =
            serde_json::from_value(json!({ "sub": "user-7", "exp": 1 })).unwrap();
        assert_eq!(claims.user_id(), Some("user-7"));

        let claims: UserClaims = serde_json::from_value(json!({ "id": " ", "exp": 1 })).unwrap();
        assert_eq!(claims.user_id(), None);
    }
}
