use async_trait::async_trait;
use esibot_core::{FetchOptions, UpstreamClient, UpstreamError, UpstreamResponse};
use reqwest::{
    header::{ETAG, IF_NONE_MATCH},
    Client,
};
use tracing::debug;

/// `UpstreamClient` over HTTP against a single ESI host.
#[derive(Clone, Debug)]
pub struct HttpUpstreamClient {
    client: Client,
    base_url: String,
}

impl HttpUpstreamClient {
    pub fn new(base_url: &str, user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder().user_agent(user_agent.to_owned()).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self { client, base_url: base_url.trim_end_matches('/').to_owned() }
    }

    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    async fn fetch(
        &self,
        path: &str,
        options: FetchOptions,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let url = self.url_for(path);
        let mut request = self.client.get(&url);
        if let Some(etag) = &options.if_none_match {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response =
            request.send().await.map_err(|error| UpstreamError::Transport(error.to_string()))?;
        let status = response.status().as_u16();
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = response
            .bytes()
            .await
            .map_err(|error| UpstreamError::Transport(error.to_string()))?
            .to_vec();

        debug!(
            event_name = "upstream.http.response",
            url = %url,
            status,
            bytes = body.len(),
            "upstream responded"
        );
        Ok(UpstreamResponse { status, body, etag })
    }
}
