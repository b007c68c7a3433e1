//! Fetching datafiles from a remote location.
use std::sync::OnceLock;

use reqwest::Url;

use crate::{DatafileContent, Error, Result};

/// Source of datafile contents.
///
/// The default implementation is [`HttpDatafileFetcher`]. Closures taking a `&Url` work as well,
/// which is handy for tests and for hosts that already have their own HTTP stack.
pub trait DatafileFetcher {
    /// Fetch and parse the datafile located at `url`.
    fn fetch_datafile(&self, url: &Url) -> Result<DatafileContent>;
}

impl<T: Fn(&Url) -> Result<DatafileContent>> DatafileFetcher for T {
    fn fetch_datafile(&self, url: &Url) -> Result<DatafileContent> {
        self(url)
    }
}

/// Fetches datafiles over HTTP(S) with a blocking `reqwest` client.
///
/// The `reqwest` client is built on the first fetch, on the thread doing the fetching. Creating a
/// fetcher is therefore cheap and safe inside an async runtime.
pub struct HttpDatafileFetcher {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: OnceLock<reqwest::blocking::Client>,
}

impl HttpDatafileFetcher {
    /// Create a fetcher. No connection is made until the first fetch.
    pub fn new() -> HttpDatafileFetcher {
        HttpDatafileFetcher {
            client: OnceLock::new(),
        }
    }
}

impl Default for HttpDatafileFetcher {
    fn default() -> HttpDatafileFetcher {
        HttpDatafileFetcher::new()
    }
}

impl DatafileFetcher for HttpDatafileFetcher {
    fn fetch_datafile(&self, url: &Url) -> Result<DatafileContent> {
        log::debug!(target: "featurevisor", url = url.as_str(); "fetching datafile");
        let client = self.client.get_or_init(reqwest::blocking::Client::new);
        let response = client.get(url.clone()).send()?;

        let status = response.status();
        if !status.is_success() {
            log::warn!(target: "featurevisor", "received non-2xx response while fetching datafile: {status}");
            return Err(Error::UnexpectedStatus(status));
        }

        let body = response.bytes()?;
        let content: DatafileContent = serde_json::from_slice(&body)?;

        log::debug!(target: "featurevisor", revision = content.revision.as_str(); "successfully fetched datafile");
        Ok(content)
    }
}
