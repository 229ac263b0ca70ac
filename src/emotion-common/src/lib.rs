//! Common utilities shared across the emotion bridge crates.

pub mod http_client;

pub use http_client::{
    DEFAULT_TIMEOUT, HEALTH_CHECK_TIMEOUT, STREAM_CONNECT_TIMEOUT, USER_AGENT,
    create_client_with_timeout, create_default_client, create_event_stream_client,
    create_health_check_client,
};
