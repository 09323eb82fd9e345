use std::time::Duration;

use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::USER_AGENT;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "https://www.reddit.com/";
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub user_agent: String,
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

#[derive(Debug, Clone, Default)]
pub struct ListingOptions {
    pub after: Option<String>,
    pub limit: Option<u32>,
}

impl ListingOptions {
    // `after` is always sent, empty on the first page.
    fn into_params(self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(limit) = self.limit {
            params.push(("limit".into(), limit.to_string()));
        }
        params.push(("after".into(), self.after.unwrap_or_default()));
        params
    }
}

pub struct Client {
    http: HttpClient,
    user_agent: String,
    base_url: Url,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let base = config
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = Url::parse(&base).map_err(|_| Error::InvalidUrl(base.clone()))?;
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(30)))
                .build()
                .map_err(|err| Error::transport(base_url.as_str(), err))?,
        };
        let user_agent = if config.user_agent.trim().is_empty() {
            format!("reddit-image-feed/{}", crate::VERSION)
        } else {
            config.user_agent
        };

        Ok(Client {
            http,
            user_agent,
            base_url,
        })
    }

    pub fn subreddit_listing(&self, subreddit: &str, opts: ListingOptions) -> Result<Listing<Post>> {
        let path = format!(
            "/r/{}/.json",
            subreddit.trim().trim_start_matches("r/").trim_matches('/')
        );
        self.fetch_listing(&path, opts)
    }

    fn fetch_listing<T>(&self, path: &str, opts: ListingOptions) -> Result<Listing<T>>
    where
        T: DeserializeOwned,
    {
        let params = opts.into_params();
        let resp = self.request(path, &params)?;
        let url = resp.url().to_string();
        let body = resp.bytes().map_err(|err| Error::transport(&url, err))?;
        let listing: ListingEnvelope<T> = serde_json::from_slice(&body)?;
        Ok(listing.data)
    }

    fn request(&self, path: &str, params: &[(String, String)]) -> Result<Response> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|_| Error::InvalidUrl(path.to_string()))?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
        }

        log::debug!("fetching {}", url);
        let resp = self
            .http
            .get(url.clone())
            .header(USER_AGENT, self.user_agent.clone())
            .send()
            .map_err(|err| Error::transport(url.as_str(), err))?;
        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(Error::Status {
                url: url.to_string(),
                status: resp.status(),
            })
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing<T> {
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default = "Vec::new")]
    pub children: Vec<Thing<T>>,
}

impl<T> Listing<T> {
    /// Continuation token, `None` once the source has no more pages.
    pub fn next_page(&self) -> Option<&str> {
        self.after.as_deref().filter(|token| !token.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thing<T> {
    #[serde(default)]
    pub kind: String,
    pub data: T,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ListingEnvelope<T> {
    data: Listing<T>,
}
