use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::{collections::BTreeMap, fmt::Display};

/// The two credential tiers of the ConvertKit API.
///
/// `api_key` authenticates form, tag and sequence operations, `api_secret`
/// authenticates subscriber management.
#[derive(Clone, Default)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl Credentials {
    pub fn new<S: Into<String>>(api_key: S, api_secret: S) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// Form parameters sent to ConvertKit as a url-encoded body.
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct Fields(BTreeMap<String, String>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.0.insert(key.into(), value.into());
    }

    /// Sets a subscriber custom field, encoded as `fields[key]`.
    pub fn custom<K: Display, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.insert(format!("fields[{key}]"), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Fields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

// ConvertKit ids are numbers, but we treat them as opaque strings.
// A null or missing id becomes the empty string.
fn opaque_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(de::Error::custom(format!(
            "expected a numeric or string id, found {other}"
        ))),
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct SubscriberFields {
    pub company_name: Option<String>,
    pub industry: Option<String>,
    pub last_name: Option<String>,
    pub mobile: Option<String>,
    pub title: Option<String>,
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct Subscriber {
    #[serde(default, deserialize_with = "opaque_id")]
    pub id: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default, alias = "email")]
    pub email_address: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub fields: SubscriberFields,
}

impl Subscriber {
    pub fn has_id(&self) -> bool {
        !self.id.is_empty()
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct SubscribersResponse {
    #[serde(default)]
    pub total_subscribers: Option<u64>,
    #[serde(default)]
    pub page: Option<u64>,
    #[serde(default)]
    pub total_pages: Option<u64>,
    #[serde(default)]
    pub subscribers: Vec<Subscriber>,
}

impl SubscribersResponse {
    /// The first subscriber of the page, if it carries an id.
    pub fn first_with_id(&self) -> Option<&Subscriber> {
        self.subscribers.first().filter(|s| s.has_id())
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct SubscriberResponse {
    #[serde(alias = "subscribers")]
    pub subscriber: Subscriber,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct Tag {
    #[serde(default, deserialize_with = "opaque_id")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct TagsResponse {
    #[serde(default)]
    pub tags: Vec<Tag>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct Form {
    #[serde(default, deserialize_with = "opaque_id")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub embed_url: Option<String>,
    #[serde(default)]
    pub archived: Option<bool>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct FormsResponse {
    #[serde(default)]
    pub forms: Vec<Form>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct Subscription {
    #[serde(default, deserialize_with = "opaque_id")]
    pub id: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub subscribable_type: Option<String>,
    #[serde(default)]
    pub subscriber: Subscriber,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct SubscriptionResponse {
    pub subscription: Subscription,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct FormSubscriptionsResponse {
    #[serde(default)]
    pub total_subscriptions: Option<u64>,
    #[serde(default)]
    pub page: Option<u64>,
    #[serde(default)]
    pub total_pages: Option<u64>,
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}

/// Error body returned by ConvertKit on failed requests.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ConvertKitError {
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl Display for ConvertKitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(
            format!(
                "{}: {}",
                self.error,
                self.message.clone().unwrap_or_default()
            )
            .as_str(),
        )
    }
}
