use std::time::Duration;

use crate::{
    datafile::Feature,
    datafile_fetcher::DatafileFetcher,
    evaluation::{InitialFeatures, StickyFeatures},
    evaluator::EvaluationHooks,
    events::{ActivationEvent, EventListener, Listeners, ReadyEvent, RefreshEvent, UpdateEvent},
    Client, Context, DatafileContent, Result,
};

/// Configuration for [`Client`].
///
/// Either an inline datafile or a datafile URL is required. Everything else is optional.
pub struct ClientConfig {
    pub(crate) datafile: Option<DatafileContent>,
    pub(crate) datafile_url: Option<String>,
    /// `None` falls back to [`crate::HttpDatafileFetcher`] once a client needs to fetch.
    pub(crate) datafile_fetcher: Option<Box<dyn DatafileFetcher + Send + Sync>>,
    pub(crate) hooks: EvaluationHooks,
    pub(crate) sticky_features: Option<StickyFeatures>,
    pub(crate) initial_features: Option<InitialFeatures>,
    pub(crate) refresh_interval: Option<Duration>,
    pub(crate) on_ready: Listeners<ReadyEvent>,
    pub(crate) on_refresh: Listeners<RefreshEvent>,
    pub(crate) on_update: Listeners<UpdateEvent>,
    pub(crate) on_activation: Listeners<ActivationEvent>,
}

impl ClientConfig {
    /// Create a configuration without a datafile source. One has to be set with
    /// [`ClientConfig::datafile`] or [`ClientConfig::datafile_url`] before creating a client.
    pub fn new() -> ClientConfig {
        ClientConfig {
            datafile: None,
            datafile_url: None,
            datafile_fetcher: None,
            hooks: EvaluationHooks::default(),
            sticky_features: None,
            initial_features: None,
            refresh_interval: None,
            on_ready: Listeners::default(),
            on_refresh: Listeners::default(),
            on_update: Listeners::default(),
            on_activation: Listeners::default(),
        }
    }

    /// Create a configuration using an inline datafile. The client is ready right away.
    pub fn from_datafile(datafile: DatafileContent) -> ClientConfig {
        ClientConfig::new().datafile(datafile)
    }

    /// Create a configuration fetching the datafile from `datafile_url`.
    ///
    /// ```
    /// # use featurevisor::ClientConfig;
    /// ClientConfig::from_datafile_url("https://cdn.example.com/production/datafile.json");
    /// ```
    pub fn from_datafile_url(datafile_url: impl Into<String>) -> ClientConfig {
        ClientConfig::new().datafile_url(datafile_url)
    }

    /// Use `datafile` as the initial datafile.
    pub fn datafile(mut self, datafile: DatafileContent) -> Self {
        self.datafile = Some(datafile);
        self
    }

    /// Fetch the datafile from `datafile_url`.
    pub fn datafile_url(mut self, datafile_url: impl Into<String>) -> Self {
        self.datafile_url = Some(datafile_url.into());
        self
    }

    /// Replace the default HTTP fetcher.
    ///
    /// ```
    /// # use featurevisor::{ClientConfig, DatafileContent, Result};
    /// # use url::Url;
    /// let config = ClientConfig::from_datafile_url("file:///etc/datafile.json")
    ///     .datafile_fetcher(|url: &Url| -> Result<DatafileContent> {
    ///         let body = std::fs::read(url.path())?;
    ///         Ok(serde_json::from_slice(&body)?)
    ///     });
    /// ```
    pub fn datafile_fetcher(
        mut self,
        datafile_fetcher: impl DatafileFetcher + Send + Sync + 'static,
    ) -> Self {
        self.datafile_fetcher = Some(Box::new(datafile_fetcher));
        self
    }

    /// Separator between bucket key components. Defaults to `"."`.
    pub fn bucket_key_separator(mut self, separator: impl Into<String>) -> Self {
        self.hooks.bucket_key_separator = separator.into();
        self
    }

    /// Replace the computed bucket key.
    pub fn configure_bucket_key(
        mut self,
        configure_bucket_key: impl Fn(&Feature, &Context, String) -> String + Send + Sync + 'static,
    ) -> Self {
        self.hooks.configure_bucket_key = Some(Box::new(configure_bucket_key));
        self
    }

    /// Replace the computed bucket value. Mostly useful to pin bucketing in tests.
    ///
    /// ```
    /// # use featurevisor::{ClientConfig, DatafileContent};
    /// let config = ClientConfig::from_datafile(DatafileContent::empty())
    ///     .configure_bucket_value(|_feature, _context, _value| 50_000);
    /// ```
    pub fn configure_bucket_value(
        mut self,
        configure_bucket_value: impl Fn(&Feature, &Context, u32) -> u32 + Send + Sync + 'static,
    ) -> Self {
        self.hooks.configure_bucket_value = Some(Box::new(configure_bucket_value));
        self
    }

    /// Transform every context before evaluation.
    pub fn intercept_context(
        mut self,
        intercept_context: impl Fn(&Context) -> Context + Send + Sync + 'static,
    ) -> Self {
        self.hooks.intercept_context = Some(Box::new(intercept_context));
        self
    }

    /// Overrides that win over everything in the datafile.
    pub fn sticky_features(mut self, sticky_features: StickyFeatures) -> Self {
        self.sticky_features = Some(sticky_features);
        self
    }

    /// Overrides used until the first datafile is loaded.
    pub fn initial_features(mut self, initial_features: InitialFeatures) -> Self {
        self.initial_features = Some(initial_features);
        self
    }

    /// Refresh the datafile from `datafile_url` periodically.
    pub fn refresh_interval(mut self, refresh_interval: Duration) -> Self {
        self.refresh_interval = Some(refresh_interval);
        self
    }

    /// Called once, when the first datafile is installed.
    pub fn on_ready(
        mut self,
        listener: impl EventListener<ReadyEvent> + Send + Sync + 'static,
    ) -> Self {
        self.on_ready.push(listener);
        self
    }

    /// Called after every datafile installed past the first one.
    pub fn on_refresh(
        mut self,
        listener: impl EventListener<RefreshEvent> + Send + Sync + 'static,
    ) -> Self {
        self.on_refresh.push(listener);
        self
    }

    /// Called only when a refresh changes the datafile revision.
    pub fn on_update(
        mut self,
        listener: impl EventListener<UpdateEvent> + Send + Sync + 'static,
    ) -> Self {
        self.on_update.push(listener);
        self
    }

    /// Called by [`Client::activate`] for every exposed variation.
    pub fn on_activation(
        mut self,
        listener: impl EventListener<ActivationEvent> + Send + Sync + 'static,
    ) -> Self {
        self.on_activation.push(listener);
        self
    }

    /// Create a new [`Client`] using the specified configuration.
    ///
    /// ```
    /// # use featurevisor::{ClientConfig, DatafileContent};
    /// let client = ClientConfig::from_datafile(DatafileContent::empty())
    ///     .to_client()
    ///     .unwrap();
    /// assert!(client.is_ready());
    /// ```
    ///
    /// # Errors
    ///
    /// See [`Client::new`].
    pub fn to_client(self) -> Result<Client> {
        Client::new(self)
    }
}

impl Default for ClientConfig {
    fn default() -> ClientConfig {
        ClientConfig::new()
    }
}
