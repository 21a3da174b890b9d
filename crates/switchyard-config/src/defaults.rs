//! Default value functions for serde deserialization.
//!
//! These functions forward to constants defined in `switchyard_core::defaults`.

use switchyard_core::defaults;

/// Generate default value functions that forward to switchyard_core::defaults constants.
macro_rules! default_fns {
    // For Copy types (integers, bool, etc.)
    ($($fn_name:ident => $const_name:ident : $ty:ty),* $(,)?) => {
        $(
            pub(crate) fn $fn_name() -> $ty {
                defaults::$const_name
            }
        )*
    };
}

/// Generate default value functions that return String from &str constants.
macro_rules! default_string_fns {
    ($($fn_name:ident => $const_name:ident),* $(,)?) => {
        $(
            pub(crate) fn $fn_name() -> String {
                defaults::$const_name.to_string()
            }
        )*
    };
}

default_fns! {
    default_provider_interval_secs => DEFAULT_PROVIDER_INTERVAL_SECS: u64,
    min_provider_interval_secs     => MIN_PROVIDER_INTERVAL_SECS: u64,
    default_http_timeout_secs      => DEFAULT_HTTP_TIMEOUT_SECS: u64,
    default_dns_cache_size         => DEFAULT_DNS_CACHE_SIZE: usize,
}

default_string_fns! {
    default_provider_format => DEFAULT_PROVIDER_FORMAT,
    default_geo_mode        => DEFAULT_GEO_MODE,
    default_geodata_dir     => DEFAULT_GEODATA_DIR,
}

pub(crate) fn default_prefer_ipv4() -> bool {
    true
}

pub(crate) fn default_dns_strategy() -> String {
    "system".to_string()
}
