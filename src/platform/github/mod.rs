mod client;

pub use client::GitHubMetadata;
