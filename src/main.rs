use stasis::config::Config;
use stasis::util::{setup_logger, Result};

#[actix_web::main]
async fn main() -> Result<()> {
    setup_logger();

    let config = Config::load();
    stasis::server::run(config).await
}
