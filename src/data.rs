use std::sync::Arc;

use crate::error::Result;
use crate::reddit::{self, ListingOptions, MAX_PAGE_SIZE};

pub trait ListingService: Send + Sync {
    fn load_page(&self, subreddit: &str, opts: ListingOptions)
        -> Result<reddit::Listing<reddit::Post>>;
}

pub struct RedditListingService {
    client: Arc<reddit::Client>,
}

impl RedditListingService {
    pub fn new(client: Arc<reddit::Client>) -> Self {
        Self { client }
    }
}

impl ListingService for RedditListingService {
    fn load_page(
        &self,
        subreddit: &str,
        opts: ListingOptions,
    ) -> Result<reddit::Listing<reddit::Post>> {
        self.client.subreddit_listing(subreddit, opts)
    }
}

/// Walks the listing until `limit` posts are collected or the source runs dry.
///
/// Whole pages are accumulated, so the last page may overshoot; the result is
/// truncated to `limit`. A source with fewer posts yields all of them.
pub fn fetch_posts(
    service: &dyn ListingService,
    subreddit: &str,
    limit: usize,
) -> Result<Vec<reddit::Post>> {
    let mut posts: Vec<reddit::Post> = Vec::new();
    if limit == 0 {
        return Ok(posts);
    }
    let page_size = u32::try_from(limit).map_or(MAX_PAGE_SIZE, |limit| limit.min(MAX_PAGE_SIZE));
    let mut after: Option<String> = None;

    loop {
        let listing = service.load_page(
            subreddit,
            ListingOptions {
                after: after.take(),
                limit: Some(page_size),
            },
        )?;
        let next = listing.next_page().map(str::to_string);
        posts.extend(listing.children.into_iter().map(|thing| thing.data));

        if posts.len() >= limit {
            break;
        }
        match next {
            Some(token) => after = Some(token),
            None => break,
        }
    }

    log::debug!("collected {} posts from r/{}", posts.len(), subreddit);
    posts.truncate(limit);
    Ok(posts)
}
