use anyhow::Result;
use clap::{Parser, Subcommand};
use saasguard::config::AppConfig;
use saasguard::scan::{ScanRequest, ScanType};

#[derive(Parser)]
#[command(
    name = "saasguard",
    about = "Self-hosted SaaS application discovery and risk scoring",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the daemon configuration file
    #[arg(long, default_value = "saasguard.toml", global = true)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + recurring-scan scheduler)
    Serve {
        /// Bind address (overrides the config file)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run a one-shot scan for a subject
    Scan {
        /// Subject (user or organization) id from the config file
        #[arg(long)]
        subject: String,

        /// Scan type: quick, comprehensive, compliance or custom
        #[arg(long, default_value = "comprehensive")]
        scan_type: String,

        /// Source ids to run (custom scans only, repeatable)
        #[arg(long)]
        source: Vec<String>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Manage recurring scans
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },

    /// Inspect the classification table
    Table {
        #[command(subcommand)]
        action: TableAction,
    },
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// List all schedules
    List,

    /// Add a new schedule
    Add {
        /// Schedule name
        #[arg(long)]
        name: String,

        /// Cron expression (5-field)
        #[arg(long)]
        cron: String,

        /// Subject id to scan
        #[arg(long)]
        subject: String,

        /// Scan type to run
        #[arg(long, default_value = "comprehensive")]
        scan_type: String,
    },

    /// Remove a schedule
    Remove {
        /// Schedule name
        #[arg(long)]
        name: String,
    },

    /// Preview what will run in the next N hours
    DryRun {
        /// Hours to preview
        #[arg(long, default_value = "24")]
        hours: u64,
    },
}

#[derive(Subcommand)]
enum TableAction {
    /// Validate a classification table and print a summary
    Check {
        /// Table path; omit to check the embedded default
        #[arg(long)]
        path: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;

    match cli.command {
        Commands::Serve { bind } => {
            let mut config = config;
            if let Some(bind) = bind {
                config.bind = bind;
            }
            tracing::info!(bind = %config.bind, "Starting SaaSGuard daemon");
            saasguard::serve(config).await?;
        }
        Commands::Scan {
            subject,
            scan_type,
            source,
            json,
        } => {
            let scan_type: ScanType = scan_type.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            tracing::info!(%subject, %scan_type, "Running one-shot scan");

            let pool = saasguard::storage::open_pool(&config.db_path)?;
            let orchestrator = saasguard::build_orchestrator(&config)?;

            let mut request = ScanRequest::new(subject, scan_type);
            request.sources = source;
            let result = orchestrator.request_scan(request).await?;

            if let Err(e) = saasguard::storage::save_scan_result(&pool, &result) {
                tracing::warn!("Failed to persist scan result: {:#}", e);
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_report(&result);
            }
        }
        Commands::Schedule { action } => {
            let pool = saasguard::storage::open_pool(&config.db_path)?;
            let scheduler = saasguard::scheduler::Scheduler::new(pool);

            match action {
                ScheduleAction::List => {
                    let list = scheduler.list().await?;
                    if list.is_empty() {
                        println!("No schedules found.");
                    } else {
                        println!(
                            "{:<20} | {:<15} | {:<15} | {:<13} | Enabled",
                            "Name", "Cron", "Subject", "Scan type"
                        );
                        println!(
                            "{:-<20}-|-{:-<15}-|-{:-<15}-|-{:-<13}-|-{:-<7}",
                            "", "", "", "", ""
                        );
                        for s in list {
                            println!(
                                "{:<20} | {:<15} | {:<15} | {:<13} | {}",
                                s.name, s.cron_expr, s.subject_id, s.scan_type, s.enabled
                            );
                        }
                    }
                }
                ScheduleAction::Add {
                    name,
                    cron,
                    subject,
                    scan_type,
                } => {
                    let scan_type: ScanType =
                        scan_type.parse().map_err(|e: String| anyhow::anyhow!(e))?;
                    scheduler
                        .add_schedule(&name, &cron, &subject, scan_type)
                        .await?;
                    println!("Schedule '{}' added.", name);
                }
                ScheduleAction::Remove { name } => {
                    scheduler.remove(&name).await?;
                    println!("Schedule '{}' removed.", name);
                }
                ScheduleAction::DryRun { hours } => {
                    let preview = scheduler.preview_next_runs(hours).await?;
                    if preview.is_empty() {
                        println!("No runs scheduled in next {} hours.", hours);
                    } else {
                        println!("Upcoming runs (next {} hours):", hours);
                        for (time, name, subject) in preview {
                            println!("{} : {} ({})", time, name, subject);
                        }
                    }
                }
            }
        }
        Commands::Table { action } => match action {
            TableAction::Check { path } => {
                let table = match path {
                    Some(path) => {
                        let table = saasguard::classify::ClassificationTable::from_path(&path)?;
                        println!("Classification table '{}' is valid.", path);
                        table
                    }
                    None => {
                        let table = saasguard::classify::ClassificationTable::builtin();
                        table.validate()?;
                        println!("Embedded classification table is valid.");
                        table
                    }
                };
                println!(
                    "  critical: {} domains, {} permissions",
                    table.tiers.critical.domains.len(),
                    table.tiers.critical.permissions.len()
                );
                println!(
                    "  high:     {} domains, {} permissions",
                    table.tiers.high.domains.len(),
                    table.tiers.high.permissions.len()
                );
                println!("  medium:   {} domains", table.tiers.medium.domains.len());
                println!("  profiles: {}", table.profiles.len());
            }
        },
    }

    Ok(())
}

fn print_report(result: &saasguard::scan::ScanResult) {
    println!("\n=== SaaSGuard Scan Report ===");
    println!("Subject:    {}", result.subject_id);
    println!("Scan type:  {}", result.scan_type);
    println!(
        "Grade:      {} (composite {:.1})",
        result.grade, result.composite_score
    );
    println!(
        "Dimensions: oauth {:.1} | exposure {:.1} | compliance {:.1} | access {:.1}",
        result.dimensions.oauth_risk,
        result.dimensions.data_exposure,
        result.dimensions.compliance,
        result.dimensions.access_control
    );

    println!("\nApplications ({}):", result.inventory.len());
    if result.inventory.is_empty() {
        println!("  (none discovered)");
    } else {
        println!("{:<28} | {:<10} | {:<14} | Sources", "Domain", "Risk", "Category");
        println!("{:-<28}-|-{:-<10}-|-{:-<14}-|-{:-<10}", "", "", "", "");
        for app in result.inventory.applications() {
            println!(
                "{:<28} | {:<10} | {:<14} | {}",
                app.domain,
                app.risk_level.to_string(),
                app.category.to_string(),
                app.source_ids.len()
            );
        }
    }

    if !result.critical_findings.is_empty() {
        println!("\nCritical findings:");
        for finding in &result.critical_findings {
            println!(" ! {}", finding);
        }
    }

    println!("\nRecommendations:");
    for rec in &result.recommendations {
        println!(" - {}", rec);
    }

    if !result.partial_failures.is_empty() {
        let failed: Vec<&str> = result.partial_failures.iter().map(String::as_str).collect();
        println!("\nWarning: some sources failed: {}", failed.join(", "));
    }
    println!("=============================\n");
}
