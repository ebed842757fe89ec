//! An HTTP client that fetches flag definitions from the remote flag store.
use reqwest::{StatusCode, Url};

use crate::{Error, FlagTable, Result};

pub struct ConfigurationFetcherConfig {
    pub base_url: String,
    pub api_key: Option<String>,
}

const FEATURES_ENDPOINT: &str = "/api/features";

/// A client that fetches flag tables from the remote flag store.
pub struct ConfigurationFetcher {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::blocking::Client,
    config: ConfigurationFetcherConfig,
    /// Set once the store answered 401 Unauthorized. No further requests are issued after that.
    unauthorized: bool,
}

impl ConfigurationFetcher {
    pub fn new(config: ConfigurationFetcherConfig) -> ConfigurationFetcher {
        ConfigurationFetcher {
            client: reqwest::blocking::Client::new(),
            config,
            unauthorized: false,
        }
    }

    pub fn fetch_configuration(&mut self) -> Result<FlagTable> {
        if self.unauthorized {
            return Err(Error::Unauthorized);
        }

        let url = self.url()?;

        log::debug!(target: "feature_lookup", "fetching flag table");
        let response = self.client.get(url).send()?;

        let response = response.error_for_status().map_err(|err| {
            if err.status() == Some(StatusCode::UNAUTHORIZED) {
                log::warn!(target: "feature_lookup", "flag store rejected the request. Check your API key");
                self.unauthorized = true;
                Error::Unauthorized
            } else {
                log::warn!(target: "feature_lookup", "received non-200 response while fetching flag table: {err:?}");
                Error::from(err)
            }
        })?;

        let table: FlagTable = response.json()?;

        log::debug!(target: "feature_lookup", table_id = table.id(); "successfully fetched flag table");

        Ok(table)
    }

    fn url(&self) -> Result<Url> {
        let endpoint = format!("{}{}", self.config.base_url, FEATURES_ENDPOINT);
        let url = match &self.config.api_key {
            Some(api_key) => Url::parse_with_params(&endpoint, &[("apiKey", api_key)]),
            None => Url::parse(&endpoint),
        };
        url.map_err(Error::InvalidBaseUrl)
    }
}
