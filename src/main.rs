use anyhow::Result;
use clap::Parser;

use autobulk::cli::{self, Cli};
use autobulk::config::ConfigLoader;
use autobulk::db;
use autobulk::logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new().load()?;
    logging::init_subscriber(&config);

    let pool = db::init_pool(&config).await?;
    db::run_migrations(&pool).await?;

    cli::run(cli, pool, &config).await
}
