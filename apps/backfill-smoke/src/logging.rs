//! Tracing bootstrap for the smoke binary.

use std::env;

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,backfill_core=debug,backfill_matrix=debug";

/// App-level filter keys, consulted in order after `RUST_LOG`.
const FILTER_KEYS: [&str; 2] = ["BACKFILL_SMOKE_LOG", "BACKFILL_LOG"];

/// Install the global fmt subscriber.
///
/// `RUST_LOG` wins when it parses; otherwise the first parseable value of
/// `FILTER_KEYS` is used, then `DEFAULT_FILTER`.
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(app_directives(|key| env::var(key).ok())));
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_env_filter(env_filter)
        .try_init();
}

fn app_directives<F>(mut lookup: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    FILTER_KEYS
        .into_iter()
        .filter_map(|key| lookup(key))
        .map(|value| value.trim().to_owned())
        .find(|value| !value.is_empty() && EnvFilter::try_new(value).is_ok())
        .unwrap_or_else(|| DEFAULT_FILTER.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn directives_from_pairs(pairs: &[(&str, &str)]) -> String {
        let map = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<HashMap<_, _>>();
        app_directives(|key| map.get(key).cloned())
    }

    #[test]
    fn falls_back_to_default_filter() {
        assert_eq!(directives_from_pairs(&[]), DEFAULT_FILTER);
    }

    #[test]
    fn smoke_key_takes_precedence_over_generic_key() {
        let directives = directives_from_pairs(&[
            ("BACKFILL_SMOKE_LOG", "trace"),
            ("BACKFILL_LOG", "warn"),
        ]);
        assert_eq!(directives, "trace");
    }

    #[test]
    fn blank_or_unparseable_values_are_skipped() {
        let directives = directives_from_pairs(&[
            ("BACKFILL_SMOKE_LOG", "   "),
            ("BACKFILL_LOG", " backfill_core=debug "),
        ]);
        assert_eq!(directives, "backfill_core=debug");

        let directives = directives_from_pairs(&[("BACKFILL_LOG", "backfill_core=loud")]);
        assert_eq!(directives, DEFAULT_FILTER);
    }
}
