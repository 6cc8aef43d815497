//! Assembles the shortener from the backends selected on the command line.

use crate::cli::{CacheBackendArg, Cli, EventSinkArg, GeneratorArg, StorageBackendArg};
use anyhow::Context;
use redis::aio::MultiplexedConnection;
use snip_cache::{LayeredCache, MokaUrlCache, RedisUrlCache};
use snip_core::{EventSink, UrlRepository};
use snip_events::{RedisStreamEventSink, TracingEventSink};
use snip_generator::{Generator, RandomGenerator, SequenceGenerator, SequenceSettings};
use snip_shortener::{DefaultValidator, Shortener, ShortenerConfig, ShortenerService};
use snip_storage::{InMemoryRepository, PostgresRepository};
use std::sync::Arc;
use tracing::info;

/// The backend-independent parts of the service.
struct Parts {
    generator: Arc<dyn Generator>,
    events: Arc<dyn EventSink>,
    config: ShortenerConfig,
}

pub async fn build_shortener(cli: &Cli) -> anyhow::Result<Arc<dyn Shortener>> {
    let redis = if cli.needs_redis() {
        let url = cli
            .redis_url
            .as_deref()
            .context("redis url is required by the selected backends")?;
        Some(connect_redis(url).await?)
    } else {
        None
    };

    let events: Arc<dyn EventSink> = match cli.events {
        EventSinkArg::Log => Arc::new(TracingEventSink::new()),
        EventSinkArg::Redis => Arc::new(RedisStreamEventSink::new(
            redis.clone().context("redis event sink needs a connection")?,
        )),
    };

    let generator: Arc<dyn Generator> = match cli.generator {
        GeneratorArg::Random => Arc::new(RandomGenerator::new(cli.code_length)),
        GeneratorArg::Sequence => {
            let settings = SequenceSettings::builder()
                .instance_id(cli.instance_id)
                .epoch(cli.sequence_epoch)
                .length(cli.code_length)
                .build();
            Arc::new(SequenceGenerator::new(settings).context("invalid sequence generator")?)
        }
    };

    let config = ShortenerConfig::builder()
        .base_url(cli.base_url.clone())
        .click_workers(cli.click_workers)
        .click_queue_capacity(cli.click_queue_capacity)
        .build();

    let parts = Parts {
        generator,
        events,
        config,
    };

    match cli.storage {
        StorageBackendArg::InMemory => with_cache(cli, InMemoryRepository::new(), redis, parts),
        StorageBackendArg::Postgres => {
            let dsn = cli
                .postgres_dsn
                .as_deref()
                .context("postgres dsn is required when storage backend is postgres")?;
            let repository = PostgresRepository::connect(dsn, cli.postgres_max_connections)
                .await
                .context("failed to connect to postgres")?;
            repository
                .migrate()
                .await
                .context("failed to apply migrations")?;
            info!("Postgres schema is up to date");
            with_cache(cli, repository, redis, parts)
        }
    }
}

fn with_cache<R: UrlRepository>(
    cli: &Cli,
    repository: R,
    redis: Option<MultiplexedConnection>,
    parts: Parts,
) -> anyhow::Result<Arc<dyn Shortener>> {
    let moka = || MokaUrlCache::with_capacity(cli.cache_capacity);
    let remote = || {
        redis
            .clone()
            .map(RedisUrlCache::new)
            .context("redis cache needs a connection")
    };

    Ok(match cli.cache {
        CacheBackendArg::Moka => service(repository, moka(), parts),
        CacheBackendArg::Redis => service(repository, remote()?, parts),
        CacheBackendArg::Layered => {
            service(repository, LayeredCache::new(moka(), remote()?), parts)
        }
    })
}

fn service<R, C>(repository: R, cache: C, parts: Parts) -> Arc<dyn Shortener>
where
    R: UrlRepository,
    C: snip_core::UrlCache + snip_core::ResponseCache,
{
    Arc::new(ShortenerService::new(
        repository,
        cache,
        parts.generator,
        Arc::new(DefaultValidator::new()),
        parts.events,
        parts.config,
    ))
}

async fn connect_redis(url: &str) -> anyhow::Result<MultiplexedConnection> {
    let client = redis::Client::open(url).context("invalid redis url")?;
    let conn = client
        .get_multiplexed_async_connection()
        .await
        .context("failed to connect to redis")?;
    Ok(conn)
}
