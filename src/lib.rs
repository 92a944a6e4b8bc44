use std::env;

#[cfg(all(feature = "reqwest", feature = "ureq"))]
compile_error!("Features 'reqwest' and 'ureq' are mutually exclusive.");

#[cfg(not(any(feature = "reqwest", feature = "ureq")))]
compile_error!("One of the features 'reqwest' and 'ureq' must be enabled.");

use serde::ser::SerializeMap;
#[cfg(feature = "ureq")]
use ureq;

#[cfg(feature = "reqwest")]
use reqwest;

const PERPLEXITY_API_KEY: &str = "PERPLEXITY_API_KEY";
const PERPLEXITY_API_BASE: &str = "PERPLEXITY_API_BASE";
const DEFAULT_API_BASE: &str = "https://api.perplexity.ai";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("The configuration contains errors: {0}")]
    BadConfigurationError(String),

    #[error("Failed to serialize request: {0}")]
    SerializationError(serde_json::Error),

    #[error("Failed to deserialize response: {0}")]
    DeserializationError(serde_json::Error),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("API error: {0}")]
    ApiError(String),
}

pub const DEFAULT_CHAT_MODEL: &str = "sonar-reasoning-pro";

pub const ROLE_SYSTEM: &str = "system";
pub const ROLE_USER: &str = "user";
pub const ROLE_ASSISTANT: &str = "assistant";

/// One conversation turn. Some server responses omit the role, so it
/// defaults to an empty string when deserializing.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub content: String,
    #[serde(default)]
    pub role: String,
}

/// Structured output formats supported by the Sonar API.
#[derive(Debug)]
pub enum ResponseFormat {
    /// Constrain the answer to a JSON schema. The value is the schema itself,
    /// e.g. `serde_json::json!({"type": "object", "properties": { ... }})`.
    JsonSchema(serde_json::Value),
    /// Constrain the answer to match a regular expression.
    Regex(String),
}

impl serde::Serialize for ResponseFormat {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            ResponseFormat::JsonSchema(schema) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("type", "json_schema")?;
                map.serialize_entry("json_schema", &serde_json::json!({ "schema": schema }))?;
                map.end()
            }
            ResponseFormat::Regex(pattern) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("type", "regex")?;
                map.serialize_entry("regex", &serde_json::json!({ "regex": pattern }))?;
                map.end()
            }
        }
    }
}

fn is_false(value: &bool) -> bool {
    *value == false
}

// NOTE: Only options that are actually set get serialized into the request.
// The API rejects requests carrying unknown options, even "null" ones, and
// the same applies to proxies sitting in front of it.

/// Chat completions structure.
///
/// For reference, see: https://docs.perplexity.ai/api-reference/chat-completions
///
/// To construct this structure easily use the default trait:
///
/// ```rust
/// let request = mini_perplexity::ChatCompletions {
///   messages: vec![
///     mini_perplexity::Message{
///         role: mini_perplexity::ROLE_USER.into(),
///         content: "Who are you?".into()
///     }
///   ],
///   search_domain_filter: vec!["wikipedia.org".into()],
///   ..Default::default()
/// };
/// ```
#[derive(Debug, serde::Serialize)]
pub struct ChatCompletions {
    pub messages: Vec<Message>,
    pub model: String,
    /// Allow-list of domains the service restricts retrieval to.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub search_domain_filter: Vec<String>,
    /// One of "month", "week", "day", "hour".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_recency_filter: Option<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub return_images: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub return_related_questions: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    /// Must be 'false': Only non-streaming is supported.
    #[serde(skip_serializing_if = "is_false")]
    pub stream: bool,
}

impl Default for ChatCompletions {
    fn default() -> Self {
        Self {
            messages: Default::default(),
            model: DEFAULT_CHAT_MODEL.into(),
            search_domain_filter: Default::default(),
            search_recency_filter: None,
            return_images: false,
            return_related_questions: false,
            max_tokens: None,
            temperature: None,
            top_p: None,
            top_k: None,
            presence_penalty: None,
            frequency_penalty: None,
            response_format: None,
            stream: false,
        }
    }
}

#[derive(Debug, serde::Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: usize,
    pub message: Message,
    pub finish_reason: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Response to a chat completions request.
///
/// Only `choices` is load-bearing; everything else is optional so that
/// trimmed-down or proxy responses still decode.
#[derive(Debug, serde::Deserialize)]
pub struct ChatCompletionsResponse {
    pub id: Option<String>,
    pub object: Option<String>,
    pub created: Option<usize>,
    pub model: Option<String>,
    pub choices: Vec<Choice>,
    /// Source URLs backing the answer.
    pub citations: Option<Vec<String>>,
    pub usage: Option<Usage>,
}

#[cfg(feature = "ureq")]
struct ClientImpl {
    client: ureq::Agent,
    token: Option<String>,
}

#[cfg(feature = "ureq")]
impl ClientImpl {
    fn new(token: Option<String>) -> Result<ClientImpl, Error> {
        Ok(Self {
            client: ureq::Agent::new(),
            token,
        })
    }

    fn do_request(&self, url: String, body: String) -> Result<String, Error> {
        let mut request = self
            .client
            .post(&url)
            .set("Content-Type", "application/json");

        if let Some(token) = self.token.as_ref() {
            request = request.set("Authorization", &format!("Bearer {}", token));
        }

        let response = match request.send_string(&body) {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                let text = format!("{} {}", code, response.status_text());
                return Err(Error::ApiError(text));
            }
            Err(e) => return Err(Error::NetworkError(e.to_string())),
        };

        let body = response
            .into_string()
            .map_err(|e| Error::NetworkError(e.to_string()))?;
        Ok(body)
    }
}

#[cfg(feature = "reqwest")]
struct ClientImpl {
    client: reqwest::Client,
}

#[cfg(feature = "reqwest")]
impl ClientImpl {
    fn new(token: Option<String>) -> Result<ClientImpl, Error> {
        let mut headers = reqwest::header::HeaderMap::new();

        if let Some(token) = token {
            let mut value = reqwest::header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| Error::BadConfigurationError(e.to_string()))?;
            value.set_sensitive(true);
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        let client = reqwest::ClientBuilder::new()
            .default_headers(headers)
            .build()
            .map_err(|e| Error::BadConfigurationError(e.to_string()))?;

        Ok(Self { client })
    }

    async fn do_request(&self, url: String, body: String) -> Result<String, Error> {
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::NetworkError(e.to_string()))?
            .error_for_status()
            .map_err(|e| Error::ApiError(e.to_string()))?
            .text()
            .await
            .map_err(|e| Error::NetworkError(e.to_string()))?;

        Ok(response)
    }
}

pub struct Client {
    inner: ClientImpl,
    base_uri: String,
}

impl Client {
    /// Creates a new `Client` instance.
    ///
    /// This function will first check for environment variables `PERPLEXITY_API_BASE` and
    /// `PERPLEXITY_API_KEY`. If they are not set, it will use the provided `base_uri` and
    /// `token` parameters. If neither are set, it will use the default API base URI.
    ///
    /// If a `token` is not provided and `base_uri` is set to the Perplexity API base URI,
    /// an error will be returned.
    ///
    /// # Arguments
    ///
    /// * `base_uri`: The base URI of the API, or `None` to use the environment variable or default.
    /// * `token`: The API token, or `None` to use the environment variable.
    ///
    /// # Returns
    ///
    /// A `Result` containing the new `Client` instance, or an `Error` if the configuration is invalid.
    pub fn new(base_uri: Option<String>, token: Option<String>) -> Result<Client, Error> {
        let env_base_uri = env::var(PERPLEXITY_API_BASE).unwrap_or_default();
        let env_token = env::var(PERPLEXITY_API_KEY).unwrap_or_default();

        let base_uri = if env_base_uri.is_empty() {
            if let Some(uri) = base_uri {
                uri
            } else {
                DEFAULT_API_BASE.to_string()
            }
        } else {
            env_base_uri
        };

        let token = if env_token.is_empty() {
            token
        } else {
            Some(env_token)
        };

        Self::new_without_environment(base_uri, token)
    }

    /// Creates a new `Client` instance without checking environment variables.
    ///
    /// This function is used internally by `new` to create a client without checking for
    /// environment variables.
    ///
    /// # Arguments
    ///
    /// * `base_uri`: The base URI of the API.
    /// * `token`: The API token, or `None` if not required.
    ///
    /// # Returns
    ///
    /// If `base_uri` is empty, an error will be returned.
    /// If `base_uri` is set to the Perplexity API base URI and `token` is `None`, an error
    /// will be returned.
    /// A `Result` containing the new `Client` instance, or an `Error` if the configuration is invalid.
    pub fn new_without_environment(
        base_uri: String,
        token: Option<String>,
    ) -> Result<Client, Error> {
        if base_uri.is_empty() {
            return Err(Error::BadConfigurationError("No base URI given".into()));
        }

        // Only enforce a token when talking to the real service. Custom
        // endpoints (proxies, mock servers) may not require one.
        if base_uri == DEFAULT_API_BASE && token.is_none() {
            return Err(Error::BadConfigurationError("Missing api token".into()));
        }

        let inner = ClientImpl::new(token)?;
        Ok(Self { inner, base_uri })
    }

    /// Creates a new `Client` instance from environment variables.
    ///
    /// This function will read the `PERPLEXITY_API_BASE` and `PERPLEXITY_API_KEY`
    /// environment variables and use them to create a client.
    ///
    /// # Returns
    ///
    /// A `Result` containing the new `Client` instance, or an `Error` if the environment
    /// variables are not set.
    pub fn new_from_environment() -> Result<Client, Error> {
        let env_base_uri =
            env::var(PERPLEXITY_API_BASE).map_err(|e| Error::BadConfigurationError(e.to_string()))?;
        let env_token = env::var(PERPLEXITY_API_KEY).unwrap_or_default();

        let token = if env_token.is_empty() {
            None
        } else {
            Some(env_token)
        };

        Self::new_without_environment(env_base_uri, token)
    }

    /// Sends a request to the Perplexity API to generate a completion for a chat
    /// conversation, optionally restricted to a set of source domains.
    ///
    /// This function takes a `ChatCompletions` struct as input, which defines the parameters
    /// of the completion request, including the chat history, model to use, and search
    /// filters.
    ///
    /// The function returns a `ChatCompletionsResponse` struct, which contains the generated
    /// completion and the citations backing it.
    ///
    /// # Arguments
    ///
    /// * `request`: The `ChatCompletions` struct containing the request parameters.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `ChatCompletionsResponse` struct, or an `Error` if the
    /// request fails.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use mini_perplexity::{Client, ChatCompletions, Message, ROLE_USER};
    ///
    /// let client = Client::new(None, None).unwrap();
    ///
    /// // Create a new chat completion request
    /// let mut request = ChatCompletions::default();
    ///
    /// // Add a message to the chat history
    /// request.messages.push(Message {
    ///     content: "Hello!".to_string(),
    ///     role: ROLE_USER.to_string(),
    /// });
    ///
    /// // Send the request to the Perplexity API
    /// let response = client.chat_completions(&request).await.unwrap();
    ///
    /// // Print the generated completion
    /// println!("{}", response.choices[0].message.content);
    /// ```
    #[cfg(feature = "reqwest")]
    pub async fn chat_completions(
        &self,
        request: &ChatCompletions,
    ) -> Result<ChatCompletionsResponse, Error> {
        let url = format!("{}/chat/completions", self.base_uri);
        let body = serde_json::to_string(request).map_err(Error::SerializationError)?;
        let response = self.inner.do_request(url, body).await?;

        serde_json::from_str(&response).map_err(Error::DeserializationError)
    }

    /// Sends a request to the Perplexity API to generate a completion for a chat
    /// conversation, optionally restricted to a set of source domains.
    ///
    /// This function takes a `ChatCompletions` struct as input, which defines the parameters
    /// of the completion request, including the chat history, model to use, and search
    /// filters.
    ///
    /// The function returns a `ChatCompletionsResponse` struct, which contains the generated
    /// completion and the citations backing it.
    ///
    /// # Arguments
    ///
    /// * `request`: The `ChatCompletions` struct containing the request parameters.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `ChatCompletionsResponse` struct, or an `Error` if the
    /// request fails.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use mini_perplexity::{Client, ChatCompletions, Message, ROLE_USER};
    ///
    /// let client = Client::new(None, None).unwrap();
    ///
    /// // Create a new chat completion request
    /// let mut request = ChatCompletions::default();
    ///
    /// // Add a message to the chat history
    /// request.messages.push(Message {
    ///     content: "Hello!".to_string(),
    ///     role: ROLE_USER.to_string(),
    /// });
    ///
    /// // Send the request to the Perplexity API
    /// let response = client.chat_completions(&request).unwrap();
    ///
    /// // Print the generated completion
    /// println!("{}", response.choices[0].message.content);
    /// ```
    #[cfg(feature = "ureq")]
    pub fn chat_completions(
        &self,
        request: &ChatCompletions,
    ) -> Result<ChatCompletionsResponse, Error> {
        let url = format!("{}/chat/completions", self.base_uri);
        let body = serde_json::to_string(request).map_err(Error::SerializationError)?;
        let response = self.inner.do_request(url, body)?;

        serde_json::from_str(&response).map_err(Error::DeserializationError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_request() -> ChatCompletions {
        ChatCompletions {
            messages: vec![Message {
                role: ROLE_USER.into(),
                content: "Hello".into(),
            }],
            search_domain_filter: vec!["wikipedia.org".into()],
            ..Default::default()
        }
    }

    fn sample_response_body() -> String {
        json!({
            "id": "resp-1",
            "object": "chat.completion",
            "created": 1,
            "model": DEFAULT_CHAT_MODEL,
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "hello"},
                "finish_reason": "stop"
            }],
            "citations": ["https://en.wikipedia.org/wiki/Hello"],
            "usage": {"prompt_tokens": 2, "completion_tokens": 1, "total_tokens": 3}
        })
        .to_string()
    }

    #[test]
    fn unset_options_are_not_serialized() -> Result<(), Error> {
        let body = serde_json::to_value(&sample_request()).map_err(Error::SerializationError)?;

        assert_eq!(
            body,
            json!({
                "messages": [{"role": "user", "content": "Hello"}],
                "model": "sonar-reasoning-pro",
                "search_domain_filter": ["wikipedia.org"]
            })
        );

        Ok(())
    }

    #[test]
    fn set_options_are_serialized() -> Result<(), Error> {
        let request = ChatCompletions {
            max_tokens: Some(128),
            search_recency_filter: Some("week".into()),
            return_images: true,
            ..sample_request()
        };

        let body = serde_json::to_value(&request).map_err(Error::SerializationError)?;

        assert_eq!(body["max_tokens"], json!(128));
        assert_eq!(body["search_recency_filter"], json!("week"));
        assert_eq!(body["return_images"], json!(true));

        Ok(())
    }

    #[test]
    fn response_format_json_schema() -> Result<(), Error> {
        let format = ResponseFormat::JsonSchema(json!({
            "type": "object",
            "properties": {"relevant": {"type": "boolean"}},
            "required": ["relevant"]
        }));

        let value = serde_json::to_value(&format).map_err(Error::SerializationError)?;

        assert_eq!(value["type"], json!("json_schema"));
        assert_eq!(value["json_schema"]["schema"]["type"], json!("object"));

        Ok(())
    }

    #[test]
    fn response_format_regex() -> Result<(), Error> {
        let format = ResponseFormat::Regex(r"\d{4}".into());

        let value = serde_json::to_value(&format).map_err(Error::SerializationError)?;

        assert_eq!(
            value,
            json!({"type": "regex", "regex": {"regex": r"\d{4}"}})
        );

        Ok(())
    }

    #[test]
    fn minimal_response_decodes() -> Result<(), Error> {
        let response: ChatCompletionsResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"hello"}}]}"#)
                .map_err(Error::DeserializationError)?;

        assert_eq!(response.choices.len(), 1);
        assert_eq!(response.choices[0].message.content, "hello");
        assert_eq!(response.choices[0].message.role, "");
        assert!(response.citations.is_none());

        Ok(())
    }

    #[test]
    fn full_response_decodes() -> Result<(), Error> {
        let response: ChatCompletionsResponse =
            serde_json::from_str(&sample_response_body()).map_err(Error::DeserializationError)?;

        assert_eq!(response.id.as_deref(), Some("resp-1"));
        assert_eq!(response.choices[0].message.role, ROLE_ASSISTANT);
        assert_eq!(
            response.citations.as_deref(),
            Some(&["https://en.wikipedia.org/wiki/Hello".to_string()][..])
        );
        assert_eq!(response.usage.as_ref().map(|u| u.total_tokens), Some(3));

        Ok(())
    }

    #[test]
    fn missing_base_uri_is_rejected() {
        let result = Client::new_without_environment("".into(), Some("token".into()));
        assert!(matches!(result, Err(Error::BadConfigurationError(_))));
    }

    #[test]
    fn default_base_requires_token() {
        let result = Client::new_without_environment(DEFAULT_API_BASE.into(), None);
        assert!(matches!(result, Err(Error::BadConfigurationError(_))));
    }

    #[cfg(feature = "ureq")]
    #[test]
    fn chat_completions() -> Result<(), Error> {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-token")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::Json(json!({
                "messages": [{"role": "user", "content": "Hello"}],
                "model": "sonar-reasoning-pro",
                "search_domain_filter": ["wikipedia.org"]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(sample_response_body())
            .create();

        let client = Client::new_without_environment(server.url(), Some("test-token".into()))?;
        let response = client.chat_completions(&sample_request())?;

        mock.assert();
        assert_eq!(response.choices.len(), 1);
        assert_eq!(response.choices[0].message.content, "hello");

        Ok(())
    }

    #[cfg(feature = "ureq")]
    #[test]
    fn rejected_credentials_surface_as_api_error() -> Result<(), Error> {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body(r#"{"error": "invalid api key"}"#)
            .create();

        let client = Client::new_without_environment(server.url(), Some("bad-token".into()))?;
        let result = client.chat_completions(&sample_request());

        assert!(matches!(result, Err(Error::ApiError(_))));

        Ok(())
    }

    #[cfg(feature = "ureq")]
    #[test]
    fn non_json_body_surfaces_as_deserialization_error() -> Result<(), Error> {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body("not json")
            .create();

        let client = Client::new_without_environment(server.url(), Some("test-token".into()))?;
        let result = client.chat_completions(&sample_request());

        assert!(matches!(result, Err(Error::DeserializationError(_))));

        Ok(())
    }

    #[cfg(feature = "ureq")]
    #[test]
    fn connection_failure_surfaces_as_network_error() -> Result<(), Error> {
        // Port 9 (discard) is a safe bet for a refused connection.
        let client =
            Client::new_without_environment("http://127.0.0.1:9".into(), Some("token".into()))?;
        let result = client.chat_completions(&sample_request());

        assert!(matches!(result, Err(Error::NetworkError(_))));

        Ok(())
    }

    #[cfg(feature = "reqwest")]
    #[tokio::test]
    async fn chat_completions() -> Result<(), Error> {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-token")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::Json(json!({
                "messages": [{"role": "user", "content": "Hello"}],
                "model": "sonar-reasoning-pro",
                "search_domain_filter": ["wikipedia.org"]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(sample_response_body())
            .create_async()
            .await;

        let client = Client::new_without_environment(server.url(), Some("test-token".into()))?;
        let response = client.chat_completions(&sample_request()).await?;

        mock.assert_async().await;
        assert_eq!(response.choices.len(), 1);
        assert_eq!(response.choices[0].message.content, "hello");

        Ok(())
    }

    #[cfg(feature = "reqwest")]
    #[tokio::test]
    async fn rejected_credentials_surface_as_api_error() -> Result<(), Error> {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body(r#"{"error": "invalid api key"}"#)
            .create_async()
            .await;

        let client = Client::new_without_environment(server.url(), Some("bad-token".into()))?;
        let result = client.chat_completions(&sample_request()).await;

        assert!(matches!(result, Err(Error::ApiError(_))));

        Ok(())
    }

    #[cfg(feature = "reqwest")]
    #[tokio::test]
    async fn non_json_body_surfaces_as_deserialization_error() -> Result<(), Error> {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let client = Client::new_without_environment(server.url(), Some("test-token".into()))?;
        let result = client.chat_completions(&sample_request()).await;

        assert!(matches!(result, Err(Error::DeserializationError(_))));

        Ok(())
    }
}
