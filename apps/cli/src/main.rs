//! pdfaudit CLI — accessibility audits of the PDF documents on a website.
//!
//! Crawls a site for PDFs, checks each one against PDF/UA with veraPDF,
//! repairs failing documents and writes a report per run.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let config = commands::load_effective_config(&cli)?;
    commands::init_tracing(&cli, &config);
    commands::run(cli, config).await
}
