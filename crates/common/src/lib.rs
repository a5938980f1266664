pub mod config;
pub mod netif;
