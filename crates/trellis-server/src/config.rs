use std::net::SocketAddr;

use clap::Parser;
use trellis_html::DEFAULT_YIELD_EVERY;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Trellis server-rendering demo")]
pub struct ServerConfig {
    /// Address to listen on (e.g. 127.0.0.1:8080)
    #[arg(long, env = "TRELLIS_LISTEN", default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,
    /// Log filter directives, same syntax as RUST_LOG
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_filter: String,
    /// Elements rendered between cooperative yields (0 never yields)
    #[arg(long, default_value_t = DEFAULT_YIELD_EVERY)]
    pub yield_every: usize,
    /// Pages whose callbacks stay executable; older ones are discarded
    #[arg(long, default_value_t = 64)]
    pub retained_pages: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            log_filter: "info".to_string(),
            yield_every: DEFAULT_YIELD_EVERY,
            retained_pages: 64,
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
