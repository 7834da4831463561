use std::path::PathBuf;

use clap::Parser;
use reqwest::Url;

#[derive(Parser, Debug)]
pub struct Args {
    /// URL of the media to download: an m3u8 playlist, or a ranged mp4/mkv file
    #[clap(value_parser, value_name = "URL", value_hint = clap::ValueHint::Url)]
    pub url: Url,

    #[clap(flatten)]
    pub download_options: DownloadOptions,

    #[clap(flatten)]
    pub network_options: NetworkOptions,
}

#[derive(Parser, Debug)]
pub struct DownloadOptions {
    /// Output file path
    #[clap(short, long, value_parser, value_name = "PATH", value_hint = clap::ValueHint::FilePath)]
    pub output: PathBuf,

    /// Maximum number of segments to fetch concurrently
    #[clap(short = 'c', long, value_parser, default_value = "4")]
    pub max_concurrent_segments: u32,
}

#[derive(Parser, Debug)]
pub struct NetworkOptions {
    /// Network request timeout in seconds
    #[clap(long, value_parser, default_value = "30")]
    pub timeout: u64,

    /// Accept invalid/self-signed TLS certificates
    #[clap(long, value_parser, default_value = "false")]
    pub accept_invalid_certs: bool,
}
