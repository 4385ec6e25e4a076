use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use database::{connect, run_migrations, DbRepository};
use reconciler::FixedMarkPrices;
use risk::SimpleMarginPolicy;
use rust_decimal::Decimal;
use scheduler::{BatchRequest, BatchScheduler};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// The main entry point for the tally reconciliation engine.
#[tokio::main]
async fn main() {
    // Load environment variables from a .env file when present.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("{e:#}");
        std::process::exit(1);
    }
}

/// Daily ledger reconciliation for the trading journal: folds trade
/// executions into per-account, per-day balance and equity summaries.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile all active accounts (or a subset) for one date.
    Run(RunArgs),
    /// Reconcile one account over a date range, oldest day first.
    Backfill(BackfillArgs),
}

#[derive(Parser)]
struct RunArgs {
    /// Target date (YYYY-MM-DD). Defaults to yesterday, UTC.
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Restrict the batch to these account ids.
    #[arg(long, value_delimiter = ',')]
    accounts: Option<Vec<Uuid>>,

    /// Credit-facility adjustment applied to every selected account.
    #[arg(long, requires = "accounts")]
    credit_delta: Option<Decimal>,

    /// Mark prices for floating P&L, as INSTRUMENT=PRICE pairs. Without
    /// any, open positions are marked at their last traded price.
    #[arg(long = "mark", value_parser = parse_mark)]
    marks: Vec<(String, Decimal)>,
}

#[derive(Parser)]
struct BackfillArgs {
    /// The trading account to backfill.
    #[arg(long)]
    account: Uuid,

    /// First date of the range (YYYY-MM-DD).
    #[arg(long)]
    from: NaiveDate,

    /// Last date of the range, inclusive (YYYY-MM-DD).
    #[arg(long)]
    to: NaiveDate,

    /// Mark prices for floating P&L, as INSTRUMENT=PRICE pairs.
    #[arg(long = "mark", value_parser = parse_mark)]
    marks: Vec<(String, Decimal)>,
}

fn parse_mark(raw: &str) -> Result<(String, Decimal), String> {
    let (instrument, price) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected INSTRUMENT=PRICE, got '{raw}'"))?;
    let price: Decimal = price
        .parse()
        .map_err(|e| format!("bad price for {instrument}: {e}"))?;
    Ok((instrument.to_string(), price))
}

fn fixed_marks(pairs: &[(String, Decimal)]) -> FixedMarkPrices {
    pairs
        .iter()
        .fold(FixedMarkPrices::new(), |marks, (instrument, price)| {
            marks.with_price(instrument, *price)
        })
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = configuration::load_config()?;

    let pool = connect().await?;
    run_migrations(&pool).await?;
    let repository = Arc::new(DbRepository::new(pool));

    let policy = Arc::new(SimpleMarginPolicy::new(
        config.margin.leverage,
        config.ledger.money_scale,
    )?);

    // Ctrl-C stops dispatching new accounts; in-flight reconciliations
    // finish so no partial summary rows are left behind.
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested, finishing in-flight work");
            let _ = cancel_tx.send(true);
        }
    });

    let batch_scheduler = BatchScheduler::new(
        repository,
        policy,
        config.ledger.money_scale,
        config.batch.max_workers,
    )
    .with_cancellation(cancel_rx);

    match cli.command {
        Commands::Run(args) => {
            let date = match args.date {
                Some(date) => date,
                None => yesterday(),
            };
            let mut request = BatchRequest::for_date(date);
            if let (Some(delta), Some(accounts)) = (args.credit_delta, &args.accounts) {
                for id in accounts {
                    request.credit_deltas.insert(*id, delta);
                }
            }
            request.account_ids = args.accounts;

            let batch_scheduler = if args.marks.is_empty() {
                batch_scheduler
            } else {
                batch_scheduler.with_marks(Arc::new(fixed_marks(&args.marks)))
            };
            let report = batch_scheduler.run(request).await?;
            println!("{report}");
            if report.failed() > 0 {
                anyhow::bail!(
                    "{} account(s) failed; re-invoke with --accounts {}",
                    report.failed(),
                    report
                        .failed_accounts()
                        .iter()
                        .map(Uuid::to_string)
                        .collect::<Vec<_>>()
                        .join(",")
                );
            }
        }
        Commands::Backfill(args) => {
            let batch_scheduler = if args.marks.is_empty() {
                batch_scheduler
            } else {
                batch_scheduler.with_marks(Arc::new(fixed_marks(&args.marks)))
            };
            let report = batch_scheduler
                .backfill(args.account, args.from, args.to)
                .await?;
            for (date, outcome) in &report.entries {
                println!("{date}: {outcome}");
            }
            if report.failed() > 0 {
                anyhow::bail!("{} day(s) failed for account {}", report.failed(), args.account);
            }
        }
    }

    Ok(())
}

/// The default batch date: the last fully elapsed UTC calendar day.
fn yesterday() -> NaiveDate {
    Utc::now()
        .date_naive()
        .pred_opt()
        .expect("current date has a predecessor")
}
