//! Topic sampler: user preferences with occasional exploration.

use log::debug;
use rand::Rng;
use rand::seq::IndexedRandom;
use spark_rs_config::TopicsConfig;

/// Chooses the topic list for one generation call.
#[derive(Debug, Clone)]
pub struct TopicSampler {
    vocabulary: Vec<String>,
    exploration_rate: f64,
    max_exploration_topics: usize,
}

impl TopicSampler {
    pub fn new(config: &TopicsConfig) -> Self {
        Self {
            vocabulary: config.vocabulary.clone(),
            exploration_rate: config.exploration_rate.clamp(0.0, 1.0),
            max_exploration_topics: config.max_exploration_topics.max(1),
        }
    }

    /// Full topic vocabulary.
    pub fn vocabulary(&self) -> &[String] {
        &self.vocabulary
    }

    /// Sample using the thread-local generator.
    pub fn sample(&self, preferences: &[String]) -> Vec<String> {
        self.sample_with(preferences, &mut rand::rng())
    }

    /// Sample with an explicit generator.
    ///
    /// With probability `exploration_rate` the preferences are replaced by
    /// 1..=`max_exploration_topics` topics drawn from the vocabulary minus
    /// the preferences. An empty complement falls back to the preferences.
    pub fn sample_with<R: Rng>(&self, preferences: &[String], rng: &mut R) -> Vec<String> {
        if !rng.random_bool(self.exploration_rate) {
            return preferences.to_vec();
        }

        let complement: Vec<&String> = self
            .vocabulary
            .iter()
            .filter(|topic| {
                !preferences
                    .iter()
                    .any(|preferred| preferred.eq_ignore_ascii_case(topic))
            })
            .collect();
        if complement.is_empty() {
            debug!("exploration skipped; preferences cover the vocabulary");
            return preferences.to_vec();
        }

        let upper = self.max_exploration_topics.min(complement.len());
        let amount = rng.random_range(1..=upper);
        let picked: Vec<String> = complement
            .choose_multiple(rng, amount)
            .map(|topic| (*topic).clone())
            .collect();
        debug!("exploring topics (count={})", picked.len());
        picked
    }
}
