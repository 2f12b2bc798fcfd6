//! Tracing setup, grounded on `libs/shared/heimdall`. Compact formatter in
//! development, JSON in production; a panic hook routes panics through
//! `tracing::error!` instead of raw stderr.

use std::panic;

use tracing_subscriber::{fmt, EnvFilter};

pub fn init_tracing(service_name: &str) {
    let default_directive = if cfg!(debug_assertions) {
        format!("{service_name}=debug,tower_http=debug")
    } else {
        format!("{service_name}=info,tower_http=warn")
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let is_production = std::env::var("ENV").map(|v| v == "production").unwrap_or(false);

    if is_production {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt().with_env_filter(filter).compact().init();
    }

    install_panic_hook();
}

fn install_panic_hook() {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown location".to_string());
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());

        tracing::error!(target: "panic_monitor", location, payload, "panic");
        default_hook(info);
    }));
}
