use std::{process, sync::Arc};

use apalis::prelude::{Monitor, WorkerBuilder, WorkerFactoryFn};
use apalis_cron::CronStream;
use scopa::{
    application::{
        error::AppError,
        jobs::{DrainWorkerContext, drain_purge_queue_schedule, process_drain_purge_queue_job},
        purge::{
            PurgeMode, PurgeObjectResolver, PurgeOutcome, PurgeService, PurgeTarget,
            QueueDrainConfig, QueueDrainer, Resolution, ResolveOptions, SiteUrls,
        },
        repos::PurgeQueueRepo,
    },
    config,
    infra::{cdn, db::PostgresRepositories, telemetry},
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Purge(args) => run_purge(settings, args).await,
        config::Command::Queue(args) => run_queue(settings, args).await,
    }
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let url = settings
        .database
        .url
        .as_deref()
        .ok_or_else(|| AppError::validation("database.url must be configured"))?;

    let pool = PostgresRepositories::connect(url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::unexpected(format!("failed to connect to database: {err}")))?;
    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::unexpected(format!("failed to run migrations: {err}")))?;

    Ok(Arc::new(PostgresRepositories::new(pool)))
}

fn build_purge_service(
    settings: &config::Settings,
    repositories: Arc<PostgresRepositories>,
) -> Result<Arc<PurgeService>, AppError> {
    let driver = cdn::build_driver(settings).map_err(AppError::from)?;
    let mode = if settings.purge.queued {
        PurgeMode::Queued
    } else {
        PurgeMode::Immediate
    };

    Ok(Arc::new(PurgeService::new(
        settings.purge.driver,
        driver,
        repositories as Arc<dyn PurgeQueueRepo>,
        settings.purge.queue_name.clone(),
        mode,
    )))
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let service = build_purge_service(&settings, repositories.clone())?;

    if !service.feature_is_available() {
        info!("No purge driver selected, nothing to serve");
        return Ok(());
    }
    if !service.feature_is_configured() {
        info!(
            driver = ?service.active_driver(),
            "Purge driver selected but not fully configured, queue items will wait"
        );
    }
    if !settings.purge.queued {
        info!("Queued purging disabled, the drain worker has nothing to do");
        return Ok(());
    }

    let drainer = Arc::new(QueueDrainer::new(
        service,
        repositories as Arc<dyn PurgeQueueRepo>,
        QueueDrainConfig {
            queue_name: settings.purge.queue_name.clone(),
            batch_limit: settings.purge.batch_limit.get(),
            max_attempts: settings.purge.max_attempts.get() as i32,
            lease: settings.purge.reserve_lease,
        },
        true,
    ));

    let monitor_handle = spawn_drain_monitor(drainer);

    info!(
        queue = %settings.purge.queue_name,
        batch_limit = settings.purge.batch_limit.get(),
        "Purge queue drain worker running"
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(|err| AppError::unexpected(format!("failed to listen for shutdown: {err}")))?;
    info!("Shutdown signal received");

    monitor_handle.abort();
    let _ = monitor_handle.await;

    Ok(())
}

fn spawn_drain_monitor(drainer: Arc<QueueDrainer>) -> tokio::task::JoinHandle<()> {
    let context = DrainWorkerContext { drainer };
    let drain_worker = WorkerBuilder::new("purge-queue-drain-worker")
        .data(context)
        .backend(CronStream::new(drain_purge_queue_schedule()))
        .build_fn(process_drain_purge_queue_job);

    let monitor = Monitor::new().register(drain_worker);

    tokio::spawn(async move {
        if let Err(err) = monitor.run().await {
            error!(error = %err, "drain monitor stopped");
        }
    })
}

async fn run_purge(settings: config::Settings, args: config::PurgeArgs) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let service = build_purge_service(&settings, repositories.clone())?;

    let outcome = match args.command {
        config::PurgeCommand::Url { url } => service.purge_by_url(&url).await?,
        config::PurgeCommand::Urls { urls } => service.purge_by_urls(&urls).await?,
        config::PurgeCommand::All => service.purge_all().await?,
        config::PurgeCommand::Post { id } => {
            purge_target(&settings, repositories, &service, PurgeTarget::Post(id)).await?
        }
        config::PurgeCommand::Term { id } => {
            purge_target(&settings, repositories, &service, PurgeTarget::Term(id)).await?
        }
    };

    match outcome {
        PurgeOutcome::Purged => println!("purged"),
        PurgeOutcome::Enqueued { items } => println!("enqueued {items} item(s)"),
        PurgeOutcome::NothingToDo => println!("nothing to purge"),
    }
    Ok(())
}

async fn purge_target(
    settings: &config::Settings,
    repositories: Arc<PostgresRepositories>,
    service: &PurgeService,
    target: PurgeTarget,
) -> Result<PurgeOutcome, AppError> {
    let base_url = settings
        .site
        .base_url
        .clone()
        .ok_or_else(|| AppError::validation("site.base_url must be configured"))?;
    let site = SiteUrls::new(base_url, settings.site.archive_depth);
    let resolver = PurgeObjectResolver::new(repositories, site);

    match resolver.resolve(target, ResolveOptions::default()).await? {
        Resolution::Skipped(reason) => {
            println!("skipped: {reason:?}");
            Ok(PurgeOutcome::NothingToDo)
        }
        Resolution::Urls(urls) => Ok(service.purge_by_urls(&urls).await?),
    }
}

async fn run_queue(settings: config::Settings, args: config::QueueArgs) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let queue: Arc<dyn PurgeQueueRepo> = repositories;
    let queue_name = settings.purge.queue_name.as_str();
    let max_attempts = settings.purge.max_attempts.get() as i32;

    match args.command {
        config::QueueCommand::Status => {
            let counts = queue.counts(queue_name, max_attempts).await?;
            println!("queue:     {queue_name}");
            println!("pending:   {}", counts.pending);
            println!("reserved:  {}", counts.reserved);
            println!("completed: {}", counts.completed);
            println!("dead:      {}", counts.dead);
        }
        config::QueueCommand::Dead { limit } => {
            let items = queue.list_dead(queue_name, max_attempts, limit).await?;
            if items.is_empty() {
                println!("no dead items");
                return Ok(());
            }
            for item in items {
                println!(
                    "{}  attempts={}  created_at={}  payload={}",
                    item.id, item.attempts, item.created_at, item.payload
                );
            }
        }
    }
    Ok(())
}
