use std::path::PathBuf;
use std::process;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use inquire::Confirm;
use tracing_subscriber::{filter::LevelFilter, fmt};

use analekta_app::cli::{
    Cli, Commands, ExportArgs, JobsArgs, JobsCommands, JobsStatusFormat, LaunchArgs, NotifyArgs,
    OrganizeArgs, RecoverArgs,
};
use analekta_app::config;
use analekta_app::error::AppError;
use analekta_app::paths::AppPaths;
use analekta_app::server;
use analekta_app::services::{
    build_pipeline_context, export_batch_summary, handle_batch, launch_batch, organize_batches,
    recover_stalled_jobs, stalled_job_count, JobStore, NotificationBatch, NotificationTarget,
    SummaryWriter,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let log_level = determine_log_level(&cli);
    init_tracing(log_level);

    if let Err(err) = run(cli).await {
        eprintln!("{err}");
        process::exit(1);
    }
}

fn init_tracing(level: LevelFilter) {
    let subscriber = fmt().with_max_level(level).with_target(false).finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::warn!("Tracing subscriber already set; skipping re-initialization.");
    }
}

fn determine_log_level(cli: &Cli) -> LevelFilter {
    // The server always logs; interactive commands stay quiet unless asked.
    let serving = matches!(cli.command, Some(Commands::Serve(_)));
    match (serving, cli.verbose) {
        (true, 0) => LevelFilter::INFO,
        (true, 1) => LevelFilter::DEBUG,
        (true, _) => LevelFilter::TRACE,
        (false, 0) => LevelFilter::OFF,
        (false, 1) => LevelFilter::INFO,
        (false, 2) => LevelFilter::DEBUG,
        (false, _) => LevelFilter::TRACE,
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let verbosity = cli.verbose;

    match cli.command {
        Some(Commands::Serve(_)) => {
            let config = config::load()?;
            server::serve(config).await?;
        }
        Some(Commands::Organize(args)) => {
            run_organize(args).await?;
        }
        Some(Commands::Launch(args)) => {
            run_launch(args, verbosity).await?;
        }
        Some(Commands::Notify(args)) => {
            run_notify(args).await?;
        }
        Some(Commands::Recover(args)) => {
            run_recover(args).await?;
        }
        Some(Commands::Jobs(args)) => {
            run_jobs(args)?;
        }
        Some(Commands::Export(args)) => {
            run_export(args).await?;
        }
        None => {
            Cli::print_help();
        }
    }

    Ok(())
}

async fn run_organize(args: OrganizeArgs) -> Result<(), AppError> {
    let config = config::load()?;
    let ctx = build_pipeline_context(&config)?;
    let bucket = args.bucket.unwrap_or(config.storage.source_bucket);
    let batch_size = args.batch_size.unwrap_or(config.batching.batch_size);

    let summary = organize_batches(ctx.documents.as_ref(), &bucket, batch_size).await?;
    if summary.total_files == 0 {
        println!("no loose documents found in bucket `{bucket}`");
        return Ok(());
    }
    println!(
        "organized {} of {} document(s) into {} batch(es)",
        summary.copied, summary.total_files, summary.total_batches
    );
    for failure in &summary.failed {
        println!("  failed {}: {}", failure.key, failure.error);
    }
    Ok(())
}

async fn run_launch(args: LaunchArgs, verbosity: u8) -> Result<(), AppError> {
    let config = config::load()?;
    let ctx = build_pipeline_context(&config)?;
    let notification = NotificationTarget {
        channel: args
            .channel
            .unwrap_or(config.analysis.notification_channel),
        role: args.role.unwrap_or(config.analysis.notification_role),
    };

    let progress = (verbosity == 0).then(make_progress_spinner);
    if let Some(spinner) = progress.as_ref() {
        spinner.set_message(format!("submitting {}", args.batch));
    }

    let summary = launch_batch(&ctx, &args.batch, &notification).await;

    if let Some(spinner) = progress {
        spinner.finish_and_clear();
    }
    let summary = summary?;

    println!(
        "started {} analysis job(s) for {} ({} failed)",
        summary.started.len(),
        summary.batch_prefix,
        summary.failed.len()
    );
    for failure in &summary.failed {
        println!("  failed {}: {}", failure.source_key, failure.error);
    }
    Ok(())
}

async fn run_notify(args: NotifyArgs) -> Result<(), AppError> {
    let config = config::load()?;
    let ctx = build_pipeline_context(&config)?;

    let raw = tokio::fs::read(&args.input)
        .await
        .map_err(|source| AppError::Io {
            path: args.input.clone(),
            source,
        })?;
    let batch: NotificationBatch = serde_json::from_slice(&raw)?;

    let summary = handle_batch(&ctx, &batch).await;
    println!(
        "processed {} envelope(s), {} failed",
        summary.processed, summary.failed
    );
    for failure in &summary.failures {
        println!(
            "  {}: {}",
            failure.job_id.as_deref().unwrap_or("<unparsed>"),
            failure.error
        );
    }
    Ok(())
}

async fn run_recover(args: RecoverArgs) -> Result<(), AppError> {
    let config = config::load()?;
    let ctx = build_pipeline_context(&config)?;

    let stalled = stalled_job_count(&ctx)?;
    if stalled == 0 {
        println!("no stalled jobs to recover");
        return Ok(());
    }

    if !args.yes {
        let confirmed = Confirm::new(&format!("Attempt to recover {stalled} stalled job(s)?"))
            .with_default(false)
            .prompt()
            .map_err(|source| AppError::PromptFailed { source })?;
        if !confirmed {
            return Err(AppError::RecoveryCancelled);
        }
    }

    let report = recover_stalled_jobs(&ctx).await?;
    println!(
        "recovered {} job(s), {} failed, {} skipped",
        report.recovered.len(),
        report.failed.len(),
        report.skipped
    );
    Ok(())
}

fn run_jobs(args: JobsArgs) -> Result<(), AppError> {
    match args.command {
        JobsCommands::Status(status_args) => jobs_status(status_args.format),
    }
}

fn jobs_status(format: JobsStatusFormat) -> Result<(), AppError> {
    let config = config::load()?;
    let paths = AppPaths::new(&config.storage.data_dir)?;
    let store = JobStore::open(&paths)?;
    let counts = store.status_counts()?;

    match format {
        JobsStatusFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&counts)?);
        }
        JobsStatusFormat::Table => {
            println!("status\tcount");
            for (status, count) in &counts {
                println!("{status}\t{count}");
            }
        }
    }
    Ok(())
}

async fn run_export(args: ExportArgs) -> Result<(), AppError> {
    let config = config::load()?;
    let ctx = build_pipeline_context(&config)?;

    let output: PathBuf = args.output;
    let mut writer = SummaryWriter::open(&output).await?;
    let summary = export_batch_summary(
        ctx.documents.as_ref(),
        &ctx.output_bucket,
        &ctx.output_prefix,
        &args.batch,
        &mut writer,
    )
    .await?;
    writer.close().await?;

    println!(
        "exported {} summary row(s) to {} ({} skipped)",
        summary.exported,
        output.display(),
        summary.failed.len()
    );
    Ok(())
}

fn make_progress_spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_draw_target(ProgressDrawTarget::stderr_with_hz(12));
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}
