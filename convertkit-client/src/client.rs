use crate::{
    error::Error,
    models::{
        Credentials, Fields, Subscriber, SubscriberResponse, SubscribersResponse, Tag,
        TagsResponse,
    },
};
use async_gen::gen;
use futures_core::Stream;
use futures_util::StreamExt;
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.convertkit.com/v3";

#[derive(Debug, Clone)]
pub struct RequestTimeout(Duration);

impl Default for RequestTimeout {
    fn default() -> Self {
        Self(Duration::from_secs(10))
    }
}

/// Which credential an endpoint family expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Auth {
    Key,
    Secret,
}

/// Outcome of [`Client::change_email_of_subscriber`].
#[derive(Debug, Clone)]
pub enum EmailChange {
    /// The new email was free, so the old subscriber record was rewritten in place.
    Renamed(SubscriberResponse),
    /// The new email already belonged to a subscriber: the old subscriber's tags
    /// were replayed onto it and the old email was unsubscribed.
    Merged {
        replayed_tags: Vec<String>,
        unsubscribed: Subscriber,
    },
    /// Both emails resolve to the same subscriber, nothing was sent.
    Unchanged(Subscriber),
}

#[derive(Debug, Clone)]
pub struct ClientBuilder {
    credentials: Credentials,
    base_url: String,
    timeout: RequestTimeout,
    insecure_form_subscriptions: bool,
}

impl ClientBuilder {
    pub fn base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = RequestTimeout(timeout);
        self
    }

    /// Skips TLS certificate verification, only for
    /// [`Client::get_subscribers_by_form_id`]. Off by default.
    pub fn insecure_form_subscriptions(mut self, insecure: bool) -> Self {
        self.insecure_form_subscriptions = insecure;
        self
    }

    pub fn build(self) -> Result<Client, Error> {
        let base_url = Url::parse(&self.base_url)?;

        let http = reqwest::Client::builder()
            .timeout(self.timeout.0)
            .build()
            .map_err(Error::Build)?;

        let insecure_http = if self.insecure_form_subscriptions {
            warn!("TLS verification is disabled for form subscription lookups");
            Some(
                reqwest::Client::builder()
                    .timeout(self.timeout.0)
                    .danger_accept_invalid_certs(true)
                    .build()
                    .map_err(Error::Build)?,
            )
        } else {
            None
        };

        Ok(Client {
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            credentials: self.credentials,
            http,
            insecure_http,
        })
    }
}

/// A ConvertKit v3 client for forms, sequences, tags and subscribers.
///
/// The client holds no state besides its credentials and transport, so it can
/// be cloned and shared freely.
#[derive(Clone, Debug)]
pub struct Client {
    base_url: String,
    credentials: Credentials,
    http: reqwest::Client,
    insecure_http: Option<reqwest::Client>,
}

impl Client {
    /// Initializes a client against the public ConvertKit API with default settings.
    pub fn new(credentials: Credentials) -> Result<Self, Error> {
        Self::builder(credentials).build()
    }

    pub fn builder(credentials: Credentials) -> ClientBuilder {
        ClientBuilder {
            credentials,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Default::default(),
            insecure_form_subscriptions: false,
        }
    }

    /// Builds a request on the verified transport.
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.request_with(&self.http, method, path)
    }

    /// The transport for form subscription lookups, the only one allowed to
    /// skip TLS verification.
    fn form_subscriptions_http(&self) -> &reqwest::Client {
        self.insecure_http.as_ref().unwrap_or(&self.http)
    }

    fn request_with(&self, http: &reqwest::Client, method: Method, path: &str) -> RequestBuilder {
        debug!("{} /{}", method, path);
        http.request(method, format!("{}/{}", self.base_url, path))
    }

    /// Attaches exactly the credential the endpoint family expects,
    /// dropping any credential the caller put in `fields`.
    fn sign(&self, mut fields: Fields, auth: Auth) -> Fields {
        fields.remove("api_key");
        fields.remove("api_secret");
        match auth {
            Auth::Key => fields.insert("api_key", self.credentials.api_key.as_str()),
            Auth::Secret => fields.insert("api_secret", self.credentials.api_secret.as_str()),
        }
        fields
    }

    pub async fn get_form_details(&self, form_id: &str) -> Result<Response, Error> {
        Ok(self
            .request(Method::GET, &format!("forms/{form_id}"))
            .query(&[("api_key", &self.credentials.api_key)])
            .send()
            .await?)
    }

    pub async fn get_forms(&self) -> Result<Response, Error> {
        Ok(self
            .request(Method::GET, "forms")
            .query(&[("api_key", &self.credentials.api_key)])
            .send()
            .await?)
    }

    /// Lists the subscriptions of a form, authenticated with the public key.
    ///
    /// This is the only call affected by
    /// [`ClientBuilder::insecure_form_subscriptions`].
    pub async fn get_subscribers_by_form_id(&self, form_id: &str) -> Result<Response, Error> {
        Ok(self
            .request_with(
                self.form_subscriptions_http(),
                Method::GET,
                &format!("forms/{form_id}/subscriptions"),
            )
            .query(&[("api_key", &self.credentials.api_key)])
            .send()
            .await?)
    }

    /// Subscribes an email to a sequence (a "course" in the API).
    ///
    /// ## Example
    ///
    /// ```no_run
    /// use convertkit_client::{Client, Credentials, Fields};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), convertkit_client::Error> {
    ///     let client = Client::new(Credentials::new("api-key", "api-secret"))?;
    ///     let fields = Fields::new()
    ///         .with("email", "jane@example.com")
    ///         .with("first_name", "Jane");
    ///     let resp = client.subscribe_user_to_sequence("1234", fields).await?;
    ///     println!("ConvertKit answered {}", resp.status());
    ///     Ok(())
    /// }
    /// ```
    pub async fn subscribe_user_to_sequence(
        &self,
        sequence_id: &str,
        fields: Fields,
    ) -> Result<Response, Error> {
        Ok(self
            .request(Method::POST, &format!("courses/{sequence_id}/subscribe"))
            .form(&self.sign(fields, Auth::Key))
            .send()
            .await?)
    }

    /// ConvertKit serves both directions from the sequence subscribe endpoint,
    /// so this sends exactly the same request as
    /// [`Client::subscribe_user_to_sequence`].
    pub async fn unsubscribe_user_from_sequence(
        &self,
        sequence_id: &str,
        fields: Fields,
    ) -> Result<Response, Error> {
        self.subscribe_user_to_sequence(sequence_id, fields).await
    }

    /// Unsubscribes an email from everything in the account.
    pub async fn unsubscribe_user(&self, email: &str) -> Result<SubscriberResponse, Error> {
        let fields = self.sign(Fields::new().with("email", email), Auth::Secret);
        let resp = self
            .request(Method::PUT, "unsubscribe")
            .form(&fields)
            .send()
            .await?;

        decode(resp).await
    }

    pub async fn subscribe_user_to_tag(&self, tag_id: &str, fields: Fields) -> Result<Response, Error> {
        Ok(self
            .request(Method::POST, &format!("tags/{tag_id}/subscribe"))
            .form(&self.sign(fields, Auth::Key))
            .send()
            .await?)
    }

    /// Lists the subscriptions of a form, authenticated with the secret key.
    /// The secret travels as a form body even though this is a GET.
    pub async fn list_subscribers_of_form(&self, form_id: &str) -> Result<Response, Error> {
        Ok(self
            .request(Method::GET, &format!("forms/{form_id}/subscriptions"))
            .form(&self.sign(Fields::new(), Auth::Secret))
            .send()
            .await?)
    }

    pub async fn list_tags_of_subscriber(&self, subscriber_id: &str) -> Result<Vec<Tag>, Error> {
        let resp = self
            .request(Method::GET, &format!("subscribers/{subscriber_id}/tags"))
            .form(&self.sign(Fields::new(), Auth::Secret))
            .send()
            .await?;

        let body: TagsResponse = decode(resp).await?;
        Ok(body.tags)
    }

    /// Lists the subscribers matching `fields`.
    ///
    /// The default query does not always surface cancelled subscribers, so when
    /// the first page has no subscriber with an id the query is repeated once,
    /// sorted by `cancelled_at`. Returns [`Error::NotFound`] if that also comes
    /// back empty.
    pub async fn list_subscribers(&self, fields: Fields) -> Result<SubscribersResponse, Error> {
        let mut fields = self.sign(fields, Auth::Secret);

        let resp = self
            .request(Method::GET, "subscribers")
            .form(&fields)
            .send()
            .await?;
        let body: SubscribersResponse = decode(resp).await?;
        if body.first_with_id().is_some() {
            return Ok(body);
        }

        debug!("No subscriber found, retrying sorted by cancelled_at");
        fields.insert("sort_field", "cancelled_at");
        let resp = self
            .request(Method::GET, "subscribers")
            .form(&fields)
            .send()
            .await?;
        let body: SubscribersResponse = decode(resp).await?;
        if body.first_with_id().is_some() {
            return Ok(body);
        }

        Err(Error::NotFound("no subscriber matches the given filters".to_string()))
    }

    /// Looks up a subscriber by email, mapping [`Error::NotFound`] to `None`.
    pub async fn find_subscriber(&self, email: &str) -> Result<Option<Subscriber>, Error> {
        match self
            .list_subscribers(Fields::new().with("email_address", email))
            .await
        {
            Ok(body) => Ok(body.subscribers.into_iter().next()),
            Err(Error::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn get_subscriber(&self, email: &str) -> Result<Subscriber, Error> {
        self.find_subscriber(email)
            .await?
            .ok_or_else(|| Error::NotFound(format!("subscriber with email {email}")))
    }

    /// Removes a tag from the subscriber owning `email`.
    ///
    /// No DELETE is sent when the email does not resolve to a subscriber.
    pub async fn unsubscribe_from_tag(&self, email: &str, tag_id: &str) -> Result<(), Error> {
        let subscriber = self.get_subscriber(email).await?;
        let fields = self.sign(Fields::new().with("email", email), Auth::Secret);

        let resp = self
            .request(
                Method::DELETE,
                &format!("subscribers/{}/tags/{tag_id}", subscriber.id),
            )
            .form(&fields)
            .send()
            .await?;

        ok_body(resp).await.map(|_| ())
    }

    pub async fn subscribe_user_to_form(&self, form_id: &str, fields: Fields) -> Result<Response, Error> {
        Ok(self
            .request(Method::POST, &format!("forms/{form_id}/subscribe"))
            .form(&self.sign(fields, Auth::Key))
            .send()
            .await?)
    }

    /// Checks whether a subscriber carries a tag.
    /// An empty `subscriber_id` is never tagged and costs no request.
    pub async fn check_subscriber_is_tagged(
        &self,
        subscriber_id: &str,
        tag_id: &str,
    ) -> Result<bool, Error> {
        if subscriber_id.is_empty() {
            return Ok(false);
        }

        let tags = self.list_tags_of_subscriber(subscriber_id).await?;
        Ok(tags.iter().any(|tag| tag.id == tag_id))
    }

    pub async fn update_subscriber_by_email(
        &self,
        email: &str,
        fields: Fields,
    ) -> Result<Subscriber, Error> {
        let subscriber = self.get_subscriber(email).await?;
        let body = self
            .update_subscriber_by_subscriber_id(&subscriber.id, fields)
            .await?;
        Ok(body.subscriber)
    }

    pub async fn update_subscriber_by_subscriber_id(
        &self,
        subscriber_id: &str,
        fields: Fields,
    ) -> Result<SubscriberResponse, Error> {
        let resp = self
            .request(Method::PUT, &format!("subscribers/{subscriber_id}"))
            .form(&self.sign(fields, Auth::Secret))
            .send()
            .await?;

        decode(resp).await
    }

    /// Subscribes `email` to each tag in turn, yielding the tag id on success.
    ///
    /// ConvertKit can't attach several tags in one call, so this issues one
    /// request per tag. The stream stops after the first error; tags already
    /// applied stay applied.
    ///
    /// ## Example
    ///
    /// ```no_run
    /// use futures_util::StreamExt;
    /// use convertkit_client::{Client, Credentials};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), convertkit_client::Error> {
    ///     let client = Client::new(Credentials::new("api-key", "api-secret"))?;
    ///     let tags = client.list_tags_of_subscriber("1234").await?;
    ///     let stream = client.replay_tags(tags, "jane@example.com".to_string()).await;
    ///
    ///     stream
    ///         .for_each(|res| async move {
    ///             match res {
    ///                 Ok(id) => println!("Tagged with {}", id),
    ///                 Err(err) => eprintln!("{err}"),
    ///             }
    ///         })
    ///         .await;
    ///
    ///     Ok(())
    /// }
    /// ```
    pub async fn replay_tags(
        &self,
        tags: Vec<Tag>,
        email: String,
    ) -> impl Stream<Item = Result<String, Error>> + '_ {
        let g = gen! {
            for tag in tags {
                let resp = self
                    .subscribe_user_to_tag(&tag.id, Fields::new().with("email", email.as_str()))
                    .await;

                let res = match resp {
                    Ok(resp) => ok_body(resp).await.map(|_| tag.id),
                    Err(err) => Err(err),
                };

                let failed = res.is_err();
                yield res;
                if failed {
                    break;
                }
            }

            ()
        };

        g.into_async_iter()
    }

    /// Moves a subscriber to a new email address.
    ///
    /// If `new_email` is not subscribed yet, the old record is rewritten in place,
    /// carrying over the first name and the custom fields. Otherwise every tag of
    /// the old subscriber is replayed onto `new_email` and `old_email` is
    /// unsubscribed once all tags were applied.
    ///
    /// When both emails resolve to the same subscriber nothing is changed, so the
    /// subscriber is never unsubscribed from its own address.
    ///
    /// Returns [`Error::NotFound`] when `old_email` has no subscriber.
    pub async fn change_email_of_subscriber(
        &self,
        old_email: &str,
        new_email: &str,
    ) -> Result<EmailChange, Error> {
        let subscriber = self.get_subscriber(old_email).await?;

        let existing = self.find_subscriber(new_email).await?;
        if existing.as_ref().is_some_and(|s| s.id == subscriber.id) {
            info!("Both emails resolve to subscriber {}, nothing to do", subscriber.id);
            return Ok(EmailChange::Unchanged(subscriber));
        }

        if existing.is_some() {
            info!(
                "Target email already subscribed, merging subscriber {}",
                subscriber.id
            );
            let tags = self.list_tags_of_subscriber(&subscriber.id).await?;

            let mut replayed_tags = vec![];
            let mut replay = std::pin::pin!(self.replay_tags(tags, new_email.to_string()).await);
            while let Some(res) = replay.next().await {
                let tag_id = res?;
                info!("Replayed tag {}", tag_id);
                replayed_tags.push(tag_id);
            }

            let unsubscribed = self.unsubscribe_user(old_email).await?.subscriber;
            return Ok(EmailChange::Merged {
                replayed_tags,
                unsubscribed,
            });
        }

        info!("Renaming subscriber {}", subscriber.id);
        let mut fields = Fields::new().with("email_address", new_email);
        if let Some(first_name) = &subscriber.first_name {
            fields.insert("first_name", first_name.as_str());
        }
        let custom = &subscriber.fields;
        for (key, value) in [
            ("company_name", &custom.company_name),
            ("industry", &custom.industry),
            ("last_name", &custom.last_name),
            ("mobile", &custom.mobile),
            ("title", &custom.title),
        ] {
            if let Some(value) = value {
                fields = fields.custom(key, value.as_str());
            }
        }

        let updated = self
            .update_subscriber_by_subscriber_id(&subscriber.id, fields)
            .await?;
        Ok(EmailChange::Renamed(updated))
    }
}

/// Reads the body of a response, failing unless the status is exactly 200.
async fn ok_body(resp: Response) -> Result<String, Error> {
    let status = resp.status();
    let body = resp.text().await?;

    if status != StatusCode::OK {
        return Err(Error::Upstream {
            status: status.as_u16(),
            error: serde_json::from_str(&body).ok(),
        });
    }

    Ok(body)
}

/// Decodes a 200 response into `T`.
///
/// Any other status becomes [`Error::Upstream`], a body that doesn't fit `T`
/// becomes [`Error::Shape`].
pub async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, Error> {
    let body = ok_body(resp).await?;
    Ok(serde_json::from_str(&body)?)
}
