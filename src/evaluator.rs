//! The precedence state machine that turns a feature key and a context into an [`Evaluation`].
//!
//! Every entry point applies the same order, stopping at the first step that produces a result:
//!
//! 1. sticky features,
//! 2. initial features (only handed in while the datafile is not ready),
//! 3. missing feature,
//! 4. missing variations (variation queries only),
//! 5. force entries,
//! 6. required features,
//! 7. bucketing and the matched traffic rule.
//!
//! Force entries are matched against the context as passed in by the caller. Everything else uses
//! the context returned by [`EvaluationHooks::intercept_context`], computed once per call.
use std::borrow::Cow;

use crate::{
    bucketer::{build_bucket_key, resolve_number, DEFAULT_BUCKET_KEY_SEPARATOR},
    datafile::{Feature, Traffic, VariableValue, Variation},
    evaluation::{Evaluation, EvaluationReason, InitialFeatures, OverrideFeature, StickyFeatures},
    traffic::{find_force, find_matched_traffic},
    Context, Datafile,
};

/// Hook replacing the computed bucket key.
pub type ConfigureBucketKey = dyn Fn(&Feature, &Context, String) -> String + Send + Sync;
/// Hook replacing the computed bucket value.
pub type ConfigureBucketValue = dyn Fn(&Feature, &Context, u32) -> u32 + Send + Sync;
/// Hook transforming the context before evaluation.
pub type InterceptContext = dyn Fn(&Context) -> Context + Send + Sync;

/// Required features referencing each other deeper than this are treated as unsatisfied.
const MAX_REQUIRED_DEPTH: usize = 32;

/// Host hooks that customize evaluation.
pub struct EvaluationHooks {
    /// Separator between bucket key components. Defaults to `"."`.
    pub bucket_key_separator: String,
    /// See [`ConfigureBucketKey`].
    pub configure_bucket_key: Option<Box<ConfigureBucketKey>>,
    /// See [`ConfigureBucketValue`].
    pub configure_bucket_value: Option<Box<ConfigureBucketValue>>,
    /// See [`InterceptContext`].
    pub intercept_context: Option<Box<InterceptContext>>,
}

impl Default for EvaluationHooks {
    fn default() -> EvaluationHooks {
        EvaluationHooks {
            bucket_key_separator: DEFAULT_BUCKET_KEY_SEPARATOR.to_owned(),
            configure_bucket_key: None,
            configure_bucket_value: None,
            intercept_context: None,
        }
    }
}

impl EvaluationHooks {
    /// Apply [`EvaluationHooks::intercept_context`], if any.
    pub(crate) fn intercept<'c>(&self, context: &'c Context) -> Cow<'c, Context> {
        match &self.intercept_context {
            Some(intercept_context) => Cow::Owned(intercept_context(context)),
            None => Cow::Borrowed(context),
        }
    }
}

/// Evaluates features against a single [`Datafile`] snapshot.
///
/// Evaluation is pure: it only reads the snapshot, the overrides, and the caller's context, so any
/// number of threads may evaluate concurrently.
pub struct Evaluator<'a> {
    datafile: &'a Datafile,
    hooks: &'a EvaluationHooks,
    sticky_features: Option<&'a StickyFeatures>,
    initial_features: Option<&'a InitialFeatures>,
}

/// Context as passed in by the caller, and after interception.
struct Contexts<'c> {
    original: &'c Context,
    intercepted: &'c Context,
}

struct Bucket {
    key: String,
    value: u32,
}

impl Bucket {
    fn evaluation(&self, feature_key: &str, reason: EvaluationReason) -> Evaluation {
        Evaluation {
            bucket_key: Some(self.key.clone()),
            bucket_value: Some(self.value),
            ..Evaluation::new(feature_key, reason)
        }
    }

    fn rule_evaluation(
        &self,
        feature_key: &str,
        traffic: &Traffic,
        reason: EvaluationReason,
    ) -> Evaluation {
        Evaluation {
            rule_key: Some(traffic.key.clone()),
            traffic: Some(traffic.clone()),
            ..self.evaluation(feature_key, reason)
        }
    }
}

impl<'a> Evaluator<'a> {
    /// Create an evaluator without sticky or initial features.
    pub fn new(datafile: &'a Datafile, hooks: &'a EvaluationHooks) -> Evaluator<'a> {
        Evaluator {
            datafile,
            hooks,
            sticky_features: None,
            initial_features: None,
        }
    }

    /// Sticky features win over everything else.
    pub fn with_sticky_features(mut self, sticky_features: &'a StickyFeatures) -> Evaluator<'a> {
        self.sticky_features = Some(sticky_features);
        self
    }

    /// Initial features are consulted right after sticky ones. Only pass them while the datafile is
    /// not ready yet.
    pub fn with_initial_features(
        mut self,
        initial_features: &'a InitialFeatures,
    ) -> Evaluator<'a> {
        self.initial_features = Some(initial_features);
        self
    }

    /// Evaluate whether the feature is enabled.
    pub fn evaluate_flag(&self, feature_key: &str, context: &Context) -> Evaluation {
        let intercepted = self.hooks.intercept(context);
        let contexts = Contexts {
            original: context,
            intercepted: &intercepted,
        };
        let evaluation = self.flag(feature_key, &contexts, 0);
        log::trace!(target: "featurevisor",
                    feature_key,
                    reason = evaluation.reason.as_str(),
                    enabled:serde = evaluation.enabled;
                    "evaluated a flag");
        evaluation
    }

    /// Evaluate which variation applies.
    pub fn evaluate_variation(&self, feature_key: &str, context: &Context) -> Evaluation {
        let intercepted = self.hooks.intercept(context);
        let contexts = Contexts {
            original: context,
            intercepted: &intercepted,
        };
        let evaluation = self.variation(feature_key, &contexts, 0);
        log::trace!(target: "featurevisor",
                    feature_key,
                    reason = evaluation.reason.as_str(),
                    variation:serde = evaluation.variation_value;
                    "evaluated a variation");
        evaluation
    }

    /// Evaluate the value of a variable.
    pub fn evaluate_variable(
        &self,
        feature_key: &str,
        variable_key: &str,
        context: &Context,
    ) -> Evaluation {
        let intercepted = self.hooks.intercept(context);
        let contexts = Contexts {
            original: context,
            intercepted: &intercepted,
        };
        let evaluation = self.variable(feature_key, variable_key, &contexts);
        log::trace!(target: "featurevisor",
                    feature_key,
                    variable_key,
                    reason = evaluation.reason.as_str();
                    "evaluated a variable");
        evaluation
    }

    fn flag(&self, feature_key: &str, contexts: &Contexts, depth: usize) -> Evaluation {
        if let Some(sticky) = self.sticky(feature_key) {
            log::debug!(target: "featurevisor", feature_key; "using sticky enabled");
            return Evaluation {
                enabled: Some(sticky.enabled),
                sticky: Some(sticky.clone()),
                ..Evaluation::new(feature_key, EvaluationReason::Sticky)
            };
        }

        if let Some(initial) = self.initial(feature_key) {
            log::debug!(target: "featurevisor", feature_key; "using initial enabled");
            return Evaluation {
                enabled: Some(initial.enabled),
                initial: Some(initial.clone()),
                ..Evaluation::new(feature_key, EvaluationReason::Initial)
            };
        }

        let Some(feature) = self.get_feature(feature_key) else {
            return Evaluation::new(feature_key, EvaluationReason::NotFound);
        };

        if feature.deprecated {
            log::warn!(target: "featurevisor", feature_key; "feature is deprecated");
        }

        if let Some((force_index, force)) = find_force(feature, contexts.original, self.datafile) {
            if let Some(enabled) = force.enabled {
                log::debug!(target: "featurevisor", feature_key, force_index; "forced enabled found");
                return Evaluation {
                    force_index: Some(force_index),
                    enabled: Some(enabled),
                    ..Evaluation::new(feature_key, EvaluationReason::Forced)
                };
            }
        }

        if !self.required_features_satisfied(feature, contexts.intercepted, depth) {
            log::debug!(target: "featurevisor", feature_key; "required features not satisfied");
            return Evaluation {
                enabled: Some(false),
                ..Evaluation::new(feature_key, EvaluationReason::Required)
            };
        }

        let bucket = self.bucket(feature, contexts.intercepted);

        if let Some(traffic) =
            find_matched_traffic(&feature.traffic, contexts.intercepted, self.datafile)
        {
            if !feature.ranges.is_empty() {
                if feature.ranges.iter().any(|range| range.contains(bucket.value)) {
                    return Evaluation {
                        enabled: Some(traffic.enabled.unwrap_or(true)),
                        ..bucket.rule_evaluation(feature_key, traffic, EvaluationReason::Allocated)
                    };
                }

                return Evaluation {
                    enabled: Some(false),
                    ..bucket.evaluation(feature_key, EvaluationReason::OutOfRange)
                };
            }

            if let Some(enabled) = traffic.enabled {
                return Evaluation {
                    enabled: Some(enabled),
                    ..bucket.rule_evaluation(feature_key, traffic, EvaluationReason::Override)
                };
            }

            if bucket.value < traffic.percentage {
                return Evaluation {
                    enabled: Some(true),
                    ..bucket.rule_evaluation(feature_key, traffic, EvaluationReason::Rule)
                };
            }
        }

        Evaluation {
            enabled: Some(false),
            ..bucket.evaluation(feature_key, EvaluationReason::Error)
        }
    }

    fn variation(&self, feature_key: &str, contexts: &Contexts, depth: usize) -> Evaluation {
        if let Some(sticky) = self.sticky(feature_key) {
            if let Some(variation) = &sticky.variation {
                log::debug!(target: "featurevisor", feature_key; "using sticky variation");
                return Evaluation {
                    variation_value: Some(variation.clone()),
                    sticky: Some(sticky.clone()),
                    ..Evaluation::new(feature_key, EvaluationReason::Sticky)
                };
            }
        }

        if let Some(initial) = self.initial(feature_key) {
            if let Some(variation) = &initial.variation {
                log::debug!(target: "featurevisor", feature_key; "using initial variation");
                return Evaluation {
                    variation_value: Some(variation.clone()),
                    initial: Some(initial.clone()),
                    ..Evaluation::new(feature_key, EvaluationReason::Initial)
                };
            }
        }

        let Some(feature) = self.get_feature(feature_key) else {
            return Evaluation::new(feature_key, EvaluationReason::NotFound);
        };

        if feature.variations.is_empty() {
            log::warn!(target: "featurevisor", feature_key; "no variations");
            return Evaluation::new(feature_key, EvaluationReason::NoVariations);
        }

        let flag = self.flag(feature_key, contexts, depth);
        if !flag.is_enabled() {
            return disabled(feature_key, &flag);
        }

        if let Some((force_index, force)) = find_force(feature, contexts.original, self.datafile) {
            if let Some(variation) = force
                .variation
                .as_deref()
                .and_then(|value| feature.get_variation(value))
            {
                log::debug!(target: "featurevisor", feature_key, force_index; "forced variation found");
                return with_variation(
                    Evaluation {
                        force_index: Some(force_index),
                        ..Evaluation::new(feature_key, EvaluationReason::Forced)
                    },
                    variation,
                );
            }
        }

        let bucket = self.reuse_bucket(flag, feature, contexts.intercepted);

        if let Some(traffic) =
            find_matched_traffic(&feature.traffic, contexts.intercepted, self.datafile)
        {
            if let Some(variation) = traffic
                .variation
                .as_deref()
                .and_then(|value| feature.get_variation(value))
            {
                return with_variation(
                    bucket.rule_evaluation(feature_key, traffic, EvaluationReason::Rule),
                    variation,
                );
            }

            if let Some(variation) = traffic
                .resolve_allocation(bucket.value)
                .and_then(|value| feature.get_variation(value))
            {
                return with_variation(
                    bucket.rule_evaluation(feature_key, traffic, EvaluationReason::Allocated),
                    variation,
                );
            }
        }

        bucket.evaluation(feature_key, EvaluationReason::Error)
    }

    fn variable(&self, feature_key: &str, variable_key: &str, contexts: &Contexts) -> Evaluation {
        let for_variable = |evaluation: Evaluation, value: Option<&VariableValue>| Evaluation {
            variable_key: Some(variable_key.to_owned()),
            variable_value: value.cloned(),
            ..evaluation
        };

        if let Some(sticky) = self.sticky(feature_key) {
            if let Some(value) = sticky.variables.get(variable_key) {
                log::debug!(target: "featurevisor", feature_key, variable_key; "using sticky variable");
                return for_variable(
                    Evaluation {
                        sticky: Some(sticky.clone()),
                        ..Evaluation::new(feature_key, EvaluationReason::Sticky)
                    },
                    Some(value),
                );
            }
        }

        if let Some(initial) = self.initial(feature_key) {
            if let Some(value) = initial.variables.get(variable_key) {
                log::debug!(target: "featurevisor", feature_key, variable_key; "using initial variable");
                return for_variable(
                    Evaluation {
                        initial: Some(initial.clone()),
                        ..Evaluation::new(feature_key, EvaluationReason::Initial)
                    },
                    Some(value),
                );
            }
        }

        let Some(feature) = self.get_feature(feature_key) else {
            return for_variable(
                Evaluation::new(feature_key, EvaluationReason::NotFound),
                None,
            );
        };

        let Some(schema) = feature.get_variable_schema(variable_key) else {
            log::warn!(target: "featurevisor", feature_key, variable_key; "variable schema not found");
            return for_variable(
                Evaluation::new(feature_key, EvaluationReason::NotFound),
                None,
            );
        };

        let for_schema = |evaluation: Evaluation, value: Option<&VariableValue>| Evaluation {
            variable_schema: Some(schema.clone()),
            ..for_variable(evaluation, value)
        };

        let flag = self.flag(feature_key, contexts, 0);
        if !flag.is_enabled() {
            return for_schema(disabled(feature_key, &flag), None);
        }

        let force = find_force(feature, contexts.original, self.datafile);
        if let Some((force_index, force)) = force {
            if let Some(value) = force.variables.get(variable_key) {
                log::debug!(target: "featurevisor", feature_key, variable_key, force_index; "forced variable found");
                return for_schema(
                    Evaluation {
                        force_index: Some(force_index),
                        ..Evaluation::new(feature_key, EvaluationReason::Forced)
                    },
                    Some(value),
                );
            }
        }

        let bucket = self.reuse_bucket(flag, feature, contexts.intercepted);

        if let Some(traffic) =
            find_matched_traffic(&feature.traffic, contexts.intercepted, self.datafile)
        {
            if let Some(value) = traffic.variables.get(variable_key) {
                return for_schema(
                    bucket.rule_evaluation(feature_key, traffic, EvaluationReason::Rule),
                    Some(value),
                );
            }

            let variation_value = force
                .and_then(|(_, force)| force.variation.as_deref())
                .or(traffic.variation.as_deref())
                .or_else(|| traffic.resolve_allocation(bucket.value));

            if let Some(variable) = variation_value
                .and_then(|value| feature.get_variation(value))
                .and_then(|variation| variation.get_variable(variable_key))
            {
                if let Some(variable_override) = variable
                    .overrides
                    .iter()
                    .find(|o| o.matches(contexts.intercepted, self.datafile))
                {
                    return for_schema(
                        bucket.rule_evaluation(feature_key, traffic, EvaluationReason::Override),
                        Some(&variable_override.value),
                    );
                }

                return for_schema(
                    bucket.rule_evaluation(feature_key, traffic, EvaluationReason::Allocated),
                    Some(&variable.value),
                );
            }
        }

        for_schema(
            bucket.evaluation(feature_key, EvaluationReason::Defaulted),
            Some(&schema.default_value),
        )
    }

    /// Every required feature must be enabled and, when a variation is required, resolve to it.
    fn required_features_satisfied(
        &self,
        feature: &Feature,
        context: &Context,
        depth: usize,
    ) -> bool {
        if feature.required.is_empty() {
            return true;
        }

        if depth >= MAX_REQUIRED_DEPTH {
            log::warn!(target: "featurevisor",
                       feature_key = feature.key.as_str();
                       "required features are nested too deeply");
            return false;
        }

        // The context is already intercepted; required features must not intercept it again.
        let contexts = Contexts {
            original: context,
            intercepted: context,
        };

        feature.required.iter().all(|required| {
            let flag = self.flag(required.key(), &contexts, depth + 1);
            if !flag.is_enabled() {
                return false;
            }

            match required.variation() {
                Some(expected) => {
                    let variation = self.variation(required.key(), &contexts, depth + 1);
                    variation.variation_value.as_deref() == Some(expected)
                }
                None => true,
            }
        })
    }

    fn bucket(&self, feature: &Feature, context: &Context) -> Bucket {
        let mut key = build_bucket_key(feature, context, &self.hooks.bucket_key_separator);
        if let Some(configure_bucket_key) = &self.hooks.configure_bucket_key {
            key = configure_bucket_key(feature, context, key);
        }

        let mut value = resolve_number(&key);
        if let Some(configure_bucket_value) = &self.hooks.configure_bucket_value {
            value = configure_bucket_value(feature, context, value);
        }

        Bucket { key, value }
    }

    /// Use the bucket computed by the flag evaluation when it got that far.
    fn reuse_bucket(&self, flag: Evaluation, feature: &Feature, context: &Context) -> Bucket {
        match (flag.bucket_key, flag.bucket_value) {
            (Some(key), Some(value)) => Bucket { key, value },
            _ => self.bucket(feature, context),
        }
    }

    fn get_feature(&self, feature_key: &str) -> Option<&'a Feature> {
        let feature = self.datafile.get_feature(feature_key);
        if feature.is_none() {
            log::warn!(target: "featurevisor", feature_key; "feature not found");
        }
        feature
    }

    fn sticky(&self, feature_key: &str) -> Option<&'a OverrideFeature> {
        self.sticky_features?.get(feature_key)
    }

    fn initial(&self, feature_key: &str) -> Option<&'a OverrideFeature> {
        self.initial_features?.get(feature_key)
    }
}

fn disabled(feature_key: &str, flag: &Evaluation) -> Evaluation {
    let reason = if flag.reason == EvaluationReason::Required {
        EvaluationReason::Required
    } else {
        EvaluationReason::Disabled
    };
    Evaluation {
        enabled: Some(false),
        ..Evaluation::new(feature_key, reason)
    }
}

fn with_variation(evaluation: Evaluation, variation: &Variation) -> Evaluation {
    Evaluation {
        variation: Some(variation.clone()),
        variation_value: Some(variation.value.clone()),
        ..evaluation
    }
}
