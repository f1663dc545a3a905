use crate::data_map::DataMap;
use crate::error::DecodeError;

/// Names of the identity fields in a provider's user-info response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserFields {
    pub open_id: String,
    pub nickname: String,
    pub avatar_url: String,
}

impl Default for UserFields {
    fn default() -> Self {
        Self {
            open_id: "id".to_owned(),
            nickname: "name".to_owned(),
            avatar_url: "avatar_url".to_owned(),
        }
    }
}

/// Identity of the authorizing user as reported by the provider.
#[derive(Debug, Clone)]
pub struct OAuthUser {
    open_id: String,
    nickname: Option<String>,
    avatar_url: Option<String>,
    data: DataMap,
}

impl OAuthUser {
    /// # Errors
    /// [`DecodeError::MissingField`] if the open id is absent or blank.
    pub fn from_data(data: DataMap, fields: &UserFields) -> Result<Self, DecodeError> {
        let open_id = data
            .get_string(&fields.open_id)
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| DecodeError::MissingField(fields.open_id.clone()))?;
        Ok(Self {
            open_id,
            nickname: data.get_string(&fields.nickname),
            avatar_url: data.get_string(&fields.avatar_url),
            data,
        })
    }

    /// Provider-scoped stable user id, numeric ids rendered as strings
    #[must_use]
    pub fn open_id(&self) -> &str {
        &self.open_id
    }

    #[must_use]
    pub fn nickname(&self) -> Option<&str> {
        self.nickname.as_deref()
    }

    #[must_use]
    pub fn avatar_url(&self) -> Option<&str> {
        self.avatar_url.as_deref()
    }

    #[must_use]
    pub fn data(&self) -> &DataMap {
        &self.data
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn map(value: Value) -> DataMap {
        match value {
            Value::Object(m) => DataMap::from(m),
            _ => unreachable!(),
        }
    }

    #[test]
    fn numeric_id_becomes_open_id() {
        let user = OAuthUser::from_data(
            map(json!({"id": 5_843_291, "name": "octo", "avatar_url": "https://a/x.png"})),
            &UserFields::default(),
        )
        .unwrap();
        assert_eq!(user.open_id(), "5843291");
        assert_eq!(user.nickname(), Some("octo"));
        assert_eq!(user.avatar_url(), Some("https://a/x.png"));
    }

    #[test]
    fn missing_id_is_rejected() {
        let err = OAuthUser::from_data(map(json!({"name": "octo"})), &UserFields::default())
            .unwrap_err();
        assert!(matches!(err, DecodeError::MissingField(ref f) if f == "id"));
    }
}
