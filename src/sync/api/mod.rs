mod client;

pub use client::GitApiClient;
