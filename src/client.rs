use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, RwLock,
    },
    time::Duration,
};

use reqwest::Url;

use crate::{
    datafile::VariableValue,
    datafile_fetcher::{DatafileFetcher, HttpDatafileFetcher},
    datafile_store::DatafileStore,
    evaluation::{InitialFeatures, StickyFeatures},
    evaluator::{EvaluationHooks, Evaluator},
    events::{ActivationEvent, Listeners, ReadyEvent, RefreshEvent, UpdateEvent},
    poller::{PollerThread, PollerThreadConfig},
    ClientConfig, Context, Datafile, DatafileContent, Error, Evaluation, Result,
};

/// A Featurevisor client.
///
/// In order to create a client instance, first create [`ClientConfig`].
///
/// # Examples
/// ```
/// # use featurevisor::{Client, ClientConfig, DatafileContent};
/// let client = Client::new(ClientConfig::from_datafile(DatafileContent::empty())).unwrap();
/// assert!(!client.is_enabled("checkout", &Default::default()));
/// ```
pub struct Client {
    state: Arc<ClientState>,
    /// Loads the datafile from `datafile_url`, and keeps refreshing it when a refresh interval is
    /// configured.
    poller: Mutex<Option<Arc<PollerThread>>>,
}

struct ClientState {
    store: DatafileStore,
    datafile_url: Option<Url>,
    datafile_fetcher: Box<dyn DatafileFetcher + Send + Sync>,
    hooks: EvaluationHooks,
    sticky_features: RwLock<Option<Arc<StickyFeatures>>>,
    initial_features: Option<InitialFeatures>,
    refresh_interval: Option<Duration>,
    ready: AtomicBool,
    refresh_in_progress: AtomicBool,
    on_ready: Listeners<ReadyEvent>,
    on_refresh: Listeners<RefreshEvent>,
    on_update: Listeners<UpdateEvent>,
    on_activation: Listeners<ActivationEvent>,
}

impl Client {
    /// Create a new `Client` using the specified configuration.
    ///
    /// With an inline datafile the client is ready immediately. With a datafile URL, an empty
    /// datafile is installed and the real one is fetched in a background thread. Use
    /// [`Client::wait_until_ready`] to block until it arrives.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingDatafile`] if neither a datafile nor a datafile URL was configured.
    /// - [`Error::InvalidDatafileUrl`] if the datafile URL cannot be parsed.
    /// - [`Error::Io`] if the background thread failed to start.
    pub fn new(config: ClientConfig) -> Result<Client> {
        let ClientConfig {
            datafile,
            datafile_url,
            datafile_fetcher,
            hooks,
            sticky_features,
            initial_features,
            refresh_interval,
            on_ready,
            on_refresh,
            on_update,
            on_activation,
        } = config;

        if datafile.is_none() && datafile_url.is_none() {
            return Err(Error::MissingDatafile);
        }

        let datafile_url = datafile_url
            .map(|url| Url::parse(&url))
            .transpose()
            .map_err(Error::InvalidDatafileUrl)?;

        let datafile_fetcher = datafile_fetcher
            .unwrap_or_else(|| Box::new(HttpDatafileFetcher::new()));

        let ready = datafile.is_some();
        let datafile = datafile.map(Datafile::new).unwrap_or_else(Datafile::empty);

        let client = Client {
            state: Arc::new(ClientState {
                store: DatafileStore::new(datafile),
                datafile_url,
                datafile_fetcher,
                hooks,
                sticky_features: RwLock::new(sticky_features.map(Arc::new)),
                initial_features,
                refresh_interval,
                ready: AtomicBool::new(ready),
                refresh_in_progress: AtomicBool::new(false),
                on_ready,
                on_refresh,
                on_update,
                on_activation,
            }),
            poller: Mutex::new(None),
        };

        if ready {
            log::debug!(target: "featurevisor", revision = client.get_revision().as_str(); "client is ready");
            client.state.on_ready.emit("ready", &ReadyEvent);
            if client.state.datafile_url.is_some() && client.state.refresh_interval.is_some() {
                client.start_refreshing()?;
            }
        } else {
            let config = match client.state.refresh_interval {
                Some(interval) => PollerThreadConfig::every(interval).with_run_immediately(true),
                None => PollerThreadConfig::once(),
            };
            client.spawn_poller(config)?;
        }

        Ok(client)
    }

    /// Whether a datafile has been installed, either inline or fetched.
    pub fn is_ready(&self) -> bool {
        self.state.ready.load(Ordering::Acquire)
    }

    /// Block until the first datafile has been fetched.
    ///
    /// # Errors
    ///
    /// Returns the error of the latest failed fetch, or [`Error::NotReady`] if nothing is loading
    /// the datafile anymore.
    pub fn wait_until_ready(&self) -> Result<()> {
        let poller = self
            .poller
            .lock()
            .expect("thread holding poller lock should not panic")
            .clone();

        // The initial load may still be notifying listeners after readiness is flagged.
        if let Some(poller) = poller.filter(|poller| poller.runs_immediately()) {
            let result = poller.wait_for_result();
            if self.is_ready() {
                return Ok(());
            }
            return result.and(Err(Error::NotReady));
        }

        if self.is_ready() {
            Ok(())
        } else {
            Err(Error::NotReady)
        }
    }

    /// Revision of the currently active datafile.
    pub fn get_revision(&self) -> String {
        self.state.store.get_datafile().revision().to_owned()
    }

    /// Replace the active datafile.
    pub fn set_datafile(&self, datafile: DatafileContent) {
        self.state.install(Datafile::new(datafile));
    }

    /// Replace sticky features. Pass an empty map to remove them.
    pub fn set_sticky_features(&self, sticky_features: StickyFeatures) {
        let mut slot = self
            .state
            .sticky_features
            .write()
            .expect("thread holding sticky features lock should not panic");
        *slot = Some(Arc::new(sticky_features));
    }

    /// Fetch the datafile from `datafile_url` right now.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingDatafileUrl`] if no datafile URL was configured.
    /// - [`Error::RefreshInProgress`] if another refresh is running. The call is a no-op then.
    /// - Any error returned by the datafile fetcher. The previous datafile stays active.
    pub fn refresh(&self) -> Result<()> {
        self.state.refresh()
    }

    /// Start refreshing the datafile every `refresh_interval` in a background thread.
    ///
    /// Does nothing when no refresh interval was configured or when refreshing is already running.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingDatafileUrl`] if no datafile URL was configured.
    /// - [`Error::Io`] if the background thread failed to start.
    pub fn start_refreshing(&self) -> Result<()> {
        if self.state.datafile_url.is_none() {
            return Err(Error::MissingDatafileUrl);
        }

        let Some(interval) = self.state.refresh_interval else {
            log::warn!(target: "featurevisor", "cannot start refreshing without refresh_interval");
            return Ok(());
        };

        if let Some(poller) = &*self
            .poller
            .lock()
            .expect("thread holding poller lock should not panic")
        {
            if !poller.is_finished() {
                log::warn!(target: "featurevisor", "refreshing has already started");
                return Ok(());
            }
        }

        self.spawn_poller(PollerThreadConfig::every(interval).with_run_immediately(!self.is_ready()))
    }

    /// Stop refreshing. Calling it more than once is harmless. A refresh that has already started
    /// still completes.
    pub fn stop_refreshing(&self) {
        let poller = self
            .poller
            .lock()
            .expect("thread holding poller lock should not panic")
            .take();

        if let Some(poller) = poller {
            log::debug!(target: "featurevisor", "stopping refreshing");
            poller.stop();
        }
    }

    /// Evaluate whether the feature is enabled for `context`, with full details.
    pub fn evaluate_flag(&self, feature_key: &str, context: &Context) -> Evaluation {
        self.with_evaluator(|evaluator, _| evaluator.evaluate_flag(feature_key, context))
    }

    /// Evaluate the variation of the feature for `context`, with full details.
    pub fn evaluate_variation(&self, feature_key: &str, context: &Context) -> Evaluation {
        self.with_evaluator(|evaluator, _| evaluator.evaluate_variation(feature_key, context))
    }

    /// Evaluate a variable of the feature for `context`, with full details.
    pub fn evaluate_variable(
        &self,
        feature_key: &str,
        variable_key: &str,
        context: &Context,
    ) -> Evaluation {
        self.with_evaluator(|evaluator, _| {
            evaluator.evaluate_variable(feature_key, variable_key, context)
        })
    }

    /// Whether the feature is enabled for `context`.
    pub fn is_enabled(&self, feature_key: &str, context: &Context) -> bool {
        self.evaluate_flag(feature_key, context).is_enabled()
    }

    /// Variation of the feature for `context`, if it has one.
    pub fn get_variation(&self, feature_key: &str, context: &Context) -> Option<String> {
        self.evaluate_variation(feature_key, context).variation_value
    }

    /// Value of a feature variable for `context`, if it resolves to one.
    pub fn get_variable(
        &self,
        feature_key: &str,
        variable_key: &str,
        context: &Context,
    ) -> Option<VariableValue> {
        self.evaluate_variable(feature_key, variable_key, context)
            .variable_value
    }

    /// Like [`Client::get_variable`], for `boolean` variables.
    pub fn get_variable_boolean(
        &self,
        feature_key: &str,
        variable_key: &str,
        context: &Context,
    ) -> Option<bool> {
        self.get_variable(feature_key, variable_key, context)?
            .as_boolean()
    }

    /// Like [`Client::get_variable`], for `string` variables.
    pub fn get_variable_string(
        &self,
        feature_key: &str,
        variable_key: &str,
        context: &Context,
    ) -> Option<String> {
        match self.get_variable(feature_key, variable_key, context)? {
            VariableValue::String(value) => Some(value),
            _ => None,
        }
    }

    /// Like [`Client::get_variable`], for `integer` variables.
    pub fn get_variable_integer(
        &self,
        feature_key: &str,
        variable_key: &str,
        context: &Context,
    ) -> Option<i64> {
        self.get_variable(feature_key, variable_key, context)?
            .as_integer()
    }

    /// Like [`Client::get_variable`], for `double` variables. Integers are widened.
    pub fn get_variable_double(
        &self,
        feature_key: &str,
        variable_key: &str,
        context: &Context,
    ) -> Option<f64> {
        self.get_variable(feature_key, variable_key, context)?
            .as_double()
    }

    /// Like [`Client::get_variable`], for `array` variables.
    pub fn get_variable_array(
        &self,
        feature_key: &str,
        variable_key: &str,
        context: &Context,
    ) -> Option<Vec<String>> {
        match self.get_variable(feature_key, variable_key, context)? {
            VariableValue::Array(values) => Some(values),
            _ => None,
        }
    }

    /// Like [`Client::get_variable`], for `object` variables.
    pub fn get_variable_object(
        &self,
        feature_key: &str,
        variable_key: &str,
        context: &Context,
    ) -> Option<serde_json::Map<String, serde_json::Value>> {
        match self.get_variable(feature_key, variable_key, context)? {
            VariableValue::Object(values) => Some(values),
            _ => None,
        }
    }

    /// Variables of type `json` hold an encoded string; it is decoded here.
    pub fn get_variable_json(
        &self,
        feature_key: &str,
        variable_key: &str,
        context: &Context,
    ) -> Option<serde_json::Value> {
        self.get_variable(feature_key, variable_key, context)?
            .to_json()
    }

    /// Evaluate the variation and notify [`ClientConfig::on_activation`] listeners that it was
    /// exposed to `context`.
    ///
    /// Returns the variation value, or `None` (emitting nothing) if no variation applies.
    pub fn activate(&self, feature_key: &str, context: &Context) -> Option<String> {
        let (evaluation, context, captured_context) = self.with_evaluator(|evaluator, datafile| {
            let evaluation = evaluator.evaluate_variation(feature_key, context);
            let context = self.state.hooks.intercept(context).into_owned();
            let captured_context: Context = datafile
                .captured_attributes()
                .filter_map(|attribute| {
                    context
                        .get(&attribute.key)
                        .map(|value| (attribute.key.clone(), value.clone()))
                })
                .collect();
            (evaluation, context, captured_context)
        });

        let variation_value = evaluation.variation_value.clone()?;

        log::debug!(target: "featurevisor",
                    feature_key,
                    variation = variation_value.as_str();
                    "activating feature");
        self.state.on_activation.emit(
            "activation",
            &ActivationEvent {
                feature_key: feature_key.to_owned(),
                variation_value: variation_value.clone(),
                context,
                captured_context,
                evaluation,
            },
        );

        Some(variation_value)
    }

    /// Run `f` with an evaluator over the current datafile snapshot.
    fn with_evaluator<T>(&self, f: impl FnOnce(&Evaluator, &Datafile) -> T) -> T {
        let datafile = self.state.store.get_datafile();
        let sticky_features = self
            .state
            .sticky_features
            .read()
            .expect("thread holding sticky features lock should not panic")
            .clone();

        let mut evaluator = Evaluator::new(&datafile, &self.state.hooks);
        if let Some(sticky_features) = &sticky_features {
            evaluator = evaluator.with_sticky_features(sticky_features);
        }
        if !self.is_ready() {
            if let Some(initial_features) = &self.state.initial_features {
                evaluator = evaluator.with_initial_features(initial_features);
            }
        }

        f(&evaluator, &datafile)
    }

    fn spawn_poller(&self, config: PollerThreadConfig) -> Result<()> {
        // Weak, so that dropping the client drops the state.
        let state = Arc::downgrade(&self.state);
        let poller = PollerThread::start(config, move || match state.upgrade() {
            Some(state) => state.refresh(),
            None => Ok(()),
        })?;

        let previous = self
            .poller
            .lock()
            .expect("thread holding poller lock should not panic")
            .replace(Arc::new(poller));
        if let Some(previous) = previous {
            previous.stop();
        }

        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.stop_refreshing();
    }
}

impl ClientState {
    fn refresh(&self) -> Result<()> {
        let Some(url) = &self.datafile_url else {
            log::warn!(target: "featurevisor", "cannot refresh without datafile_url");
            return Err(Error::MissingDatafileUrl);
        };

        if self
            .refresh_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::warn!(target: "featurevisor", "refresh is already in progress");
            return Err(Error::RefreshInProgress);
        }
        let _guard = RefreshGuard(&self.refresh_in_progress);

        let content = match self.datafile_fetcher.fetch_datafile(url) {
            Ok(content) => content,
            Err(err) => {
                log::warn!(target: "featurevisor", "failed to refresh datafile: {err}");
                return Err(err);
            }
        };

        self.install(Datafile::new(content));
        Ok(())
    }

    /// Swap in `datafile` and notify listeners.
    fn install(&self, datafile: Datafile) {
        let revision = datafile.revision().to_owned();
        let previous = self.store.set_datafile(datafile);

        if !self.ready.swap(true, Ordering::AcqRel) {
            log::debug!(target: "featurevisor", revision = revision.as_str(); "client is ready");
            self.on_ready.emit("ready", &ReadyEvent);
            return;
        }

        log::debug!(target: "featurevisor", revision = revision.as_str(); "datafile refreshed");
        self.on_refresh.emit("refresh", &RefreshEvent);

        if previous.revision() != revision {
            self.on_update.emit(
                "update",
                &UpdateEvent {
                    previous_revision: previous.revision().to_owned(),
                    revision,
                },
            );
        }
    }
}

/// Clears the refresh-in-progress flag once the refresh ends, including by panic.
struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
