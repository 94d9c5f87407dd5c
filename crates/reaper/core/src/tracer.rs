use tracing::dispatcher;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

pub fn init_once() {
    // Skip init if has been set
    if dispatcher::has_been_set() {
        return;
    }

    // set default log level
    {
        const KEY: &str = "RUST_LOG";
        if ::std::env::var_os(KEY).is_none() {
            ::std::env::set_var(KEY, "INFO");
        }
    }

    Registry::default()
        .with(EnvFilter::from_default_env())
        .with(::tracing_subscriber::fmt::layer())
        .init()
}
