use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use lumen_core::{Config, Locale};
use lumen_loader::{
    HttpFetcher, HttpImageSink, ImageRecompressor, LoaderDeps, LoaderOptions, LoaderView,
    ObjectStore, ResilientLoader,
};
use tracing::info;

#[derive(Parser, Debug)]
pub struct FetchArgs {
    /// Image URL
    url: String,

    /// Skip the fetch-and-recompress tier
    #[clap(long)]
    no_recompress: bool,

    /// Override whether exhaustion offers a download of the original
    #[clap(long, value_name = "BOOL")]
    show_download: Option<bool>,

    /// Locale for fallback text (e.g. pt-BR, es)
    #[clap(long)]
    locale: Option<String>,

    /// Write the loaded image here
    #[clap(long, short, value_name = "FILE")]
    output: Option<PathBuf>,
}

pub async fn run(config: &Config, args: FetchArgs) -> Result<(), Box<dyn std::error::Error>> {
    let settings = &config.settings.loader;
    let fetcher = HttpFetcher::new(settings.fetch_timeout())?;
    let objects = ObjectStore::new();
    let sink = Arc::new(HttpImageSink::new(fetcher.clone(), objects.clone()));
    let loader = ResilientLoader::new(LoaderDeps {
        sink: sink.clone(),
        fetcher: Arc::new(fetcher),
        recompressor: Arc::new(ImageRecompressor::new(settings.jpeg_quality)),
        objects,
    });

    let locale = args
        .locale
        .as_deref()
        .map(Locale::from_tag)
        .unwrap_or(config.settings.locale);
    let mut options = LoaderOptions::from_settings(settings, locale);
    if args.no_recompress {
        options.allow_recompression = false;
    }
    if let Some(show) = args.show_download {
        options.show_download_on_fail = show;
    }

    let mut handle = loader.mount(args.url.clone(), options);
    let view = handle.wait_settled().await;
    println!("{}", serde_json::to_string_pretty(&view)?);

    if let (LoaderView::Loaded { .. }, Some(path)) = (&view, &args.output) {
        if let Some(image) = sink.last_loaded() {
            std::fs::write(path, &image.bytes)?;
            info!(
                path = %path.display(),
                width = image.width,
                height = image.height,
                "Image written"
            );
        }
    }

    handle.unmount();
    Ok(())
}
