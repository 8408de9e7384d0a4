pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;

pub mod models {
    pub mod question;
    pub mod response;
    pub mod session;
}

pub mod repositories {
    pub mod memory;
    pub mod postgres;
    pub mod store;
}

pub mod services {
    pub mod access;
    pub mod duplicate;
    pub mod identity;
    pub mod metadata;
    pub mod stats;
    pub mod submission;
}

pub mod handlers {
    pub mod access;
    pub mod client;
    pub mod health;
    pub mod responses;
}

pub mod middleware_layer {
    pub mod rate_limit;
}
