use crate::ca::{generate_ca_certificate, spki_fingerprint};
use crate::cache::{CacheBackend, CacheStore, MemoryBackend};
use crate::config::Config;
use crate::disk_cache::DiskBackend;
use crate::events;
use crate::exchange::ActixExchange;
use crate::fetcher::OriginFetcher;
use crate::lock::RequestLock;
use crate::metrics::MetricsObserver;
use crate::proxy::Dispatcher;
use crate::tls::load_rustls_config;
use crate::util::Result;

use actix_web::{
    middleware::Logger, // provides access logging
    web,
    App,
    HttpRequest,
    HttpResponse,
    HttpServer,
};
use log::{debug, info};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
}

/// single entry point for both listeners; the body is fully buffered first
pub async fn dispatch(
    req: HttpRequest,
    body: web::Bytes,
    app_state: web::Data<AppState>,
) -> HttpResponse {
    let start_time = Instant::now();
    let exchange = ActixExchange::new(&req, body);

    let response = app_state.dispatcher.handle(&exchange).await;

    debug!(
        "{} {} -> {} {}ms",
        req.method(),
        req.uri(),
        response.status,
        start_time.elapsed().as_millis()
    );
    response.into()
}

pub async fn run(config: Config) -> Result<()> {
    // the secure listener cannot exist without an identity, so failures here end startup
    let identity = generate_ca_certificate()?;
    let fingerprint = spki_fingerprint(&identity.certificate_pem)?;
    let tls_config = load_rustls_config(&identity)?;
    info!("ca spki fingerprint: {}", fingerprint);

    if let Some(path) = &config.ca_cert_out {
        std::fs::write(path, &identity.certificate_pem)?;
        info!("wrote ca certificate to {:?}", path);
    }

    let (event_sender, event_receiver) = events::channel(config.event_buffer);
    let metrics = Arc::new(MetricsObserver::new());
    metrics.clone().spawn(event_receiver);

    let backend: Box<dyn CacheBackend> = match &config.cache_dir {
        Some(dir) => Box::new(DiskBackend::open(dir)?),
        None => Box::new(MemoryBackend::new()),
    };
    let store = Arc::new(CacheStore::new(backend, event_sender.clone()));
    let lock = Arc::new(RequestLock::new(!config.replay_only));
    if config.replay_only {
        info!("starting in replay-only mode, outbound requests disabled");
    }

    let dispatcher = Arc::new(Dispatcher::new(
        store,
        lock,
        metrics,
        event_sender,
        Arc::new(OriginFetcher::new()),
        config.hostname.clone(),
        fingerprint,
    ));

    // appstate is constructed once and cloned by actix for each worker thread
    let app_state_data = web::Data::new(AppState { dispatcher });
    let max_body_bytes = config.max_body_bytes();
    let workers = config.worker_count();

    info!(
        "stasis listening on {} (http) and {} (https) with {} workers, control host {}",
        config.http_addr, config.https_addr, workers, config.hostname
    );

    let server = HttpServer::new(move || {
        App::new()
            .app_data(app_state_data.clone())
            .app_data(web::PayloadConfig::new(max_body_bytes))
            .wrap(Logger::new("%r %s %b %D ms"))
            .default_service(web::to(dispatch))
    })
    .keep_alive(Duration::from_secs(75))
    .workers(workers)
    .bind_auto_h2c(&config.http_addr)?
    .bind_rustls(&config.https_addr, tls_config)?
    .shutdown_timeout(30); // 30 second graceful shutdown period

    server.run().await?;
    Ok(())
}
