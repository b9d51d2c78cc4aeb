use std::env;

use crate::error::OfferMatcherError;

const ENV_MAX_INSTANCES_PER_OFFER: &str = "OFFER_MATCHER_MAX_INSTANCES_PER_OFFER";
const ENV_MAILBOX_CAPACITY: &str = "OFFER_MATCHER_MAILBOX_CAPACITY";
const ENV_INITIAL_LAUNCH_TOKENS: &str = "OFFER_MATCHER_INITIAL_LAUNCH_TOKENS";

const DEFAULT_MAILBOX_CAPACITY: usize = 256;
const DEFAULT_INITIAL_LAUNCH_TOKENS: i64 = 0;

/// Tunable knobs for the offer processor.
#[derive(Debug, Clone)]
pub struct OfferMatcherConfig {
    /// Hard cap on how many accepted ops a single offer may accumulate
    /// across all match passes.
    pub max_instances_per_offer: usize,

    /// Name of the flag/env var that set `max_instances_per_offer`, kept
    /// around for diagnostic logging when the cap is hit.
    pub max_instances_per_offer_flag_name: String,

    /// Bound on the processor's command mailbox.
    pub mailbox_capacity: usize,

    /// Launch token balance the accountant starts with.
    pub initial_launch_tokens: i64,
}

impl OfferMatcherConfig {
    pub fn new(max_instances_per_offer: usize) -> Result<Self, OfferMatcherError> {
        if max_instances_per_offer == 0 {
            return Err(OfferMatcherError::InvalidConfig(
                "max_instances_per_offer must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            max_instances_per_offer,
            max_instances_per_offer_flag_name: ENV_MAX_INSTANCES_PER_OFFER.to_string(),
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            initial_launch_tokens: DEFAULT_INITIAL_LAUNCH_TOKENS,
        })
    }

    /// Reads configuration from the environment, falling back to defaults
    /// for anything unset.
    pub fn from_env() -> Result<Self, OfferMatcherError> {
        let max_instances_per_offer = match env::var(ENV_MAX_INSTANCES_PER_OFFER) {
            Ok(raw) => raw.parse::<usize>().map_err(|_| {
                OfferMatcherError::InvalidConfig(format!(
                    "{ENV_MAX_INSTANCES_PER_OFFER} must be a positive integer, got '{raw}'"
                ))
            })?,
            Err(_) => {
                return Err(OfferMatcherError::InvalidConfig(format!(
                    "{ENV_MAX_INSTANCES_PER_OFFER} is required"
                )))
            }
        };

        let mut cfg = Self::new(max_instances_per_offer)?;

        if let Ok(raw) = env::var(ENV_MAILBOX_CAPACITY) {
            cfg.mailbox_capacity = raw.parse::<usize>().map_err(|_| {
                OfferMatcherError::InvalidConfig(format!(
                    "{ENV_MAILBOX_CAPACITY} must be a positive integer, got '{raw}'"
                ))
            })?;
        }

        if let Ok(raw) = env::var(ENV_INITIAL_LAUNCH_TOKENS) {
            cfg.initial_launch_tokens = raw.parse::<i64>().map_err(|_| {
                OfferMatcherError::InvalidConfig(format!(
                    "{ENV_INITIAL_LAUNCH_TOKENS} must be an integer, got '{raw}'"
                ))
            })?;
        }

        Ok(cfg)
    }
}
