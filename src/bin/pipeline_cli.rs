//! pipeline-cli: 流水线配置校验与服务商查询的命令行工具
//!
//! Usage:
//!   pipeline-cli validate <config.yaml>     Parse and validate a pipeline config
//!   pipeline-cli providers                  List registered provider drivers

use anyhow::Context;
use std::env;
use tracing_subscriber::EnvFilter;

use ai_job_pipeline::jobs::JobType;
use ai_job_pipeline::provider::ProviderRegistry;
use ai_job_pipeline::PipelineConfig;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let result = match args[1].as_str() {
        "validate" => cmd_validate(&args[2..]),
        "providers" => cmd_providers(),
        "version" | "--version" | "-V" => {
            cmd_version();
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn print_usage() {
    println!(
        r#"pipeline-cli: AI job pipeline 命令行工具

USAGE:
    pipeline-cli <COMMAND> [ARGS]

COMMANDS:
    validate <config.yaml>      Parse and validate a pipeline configuration
    providers                   List registered provider drivers
    version                     Show version information
    help                        Show this help message

ENVIRONMENT:
    <PROVIDER>_API_KEY          Provider credential (unless api_key_env overrides it)
    AI_HTTP_TIMEOUT_SECS        Default HTTP timeout for provider calls
    AI_PROXY_URL                Route provider traffic through a proxy
    RUST_LOG                    Log filter (default: info)"#
    );
}

fn cmd_version() {
    println!("pipeline-cli {}", env!("CARGO_PKG_VERSION"));
}

fn cmd_providers() -> anyhow::Result<()> {
    for name in ProviderRegistry::with_defaults().names() {
        println!("{name}");
    }
    Ok(())
}

fn cmd_validate(args: &[String]) -> anyhow::Result<()> {
    let path = args
        .first()
        .context("usage: pipeline-cli validate <config.yaml>")?;
    let config = PipelineConfig::from_yaml_file(path)
        .with_context(|| format!("invalid config {path}"))?;
    config.check_registered(&ProviderRegistry::with_defaults())?;

    let limits = config.concurrency_limits();
    println!("✅ {path}");
    println!();
    println!("Concurrency (lease TTL {}s):", config.concurrency.lease_ttl_secs);
    println!("  {:<12} {}", "global", config.concurrency.global_limit);
    for job_type in JobType::ALL {
        println!("  {:<12} {}", job_type.as_str(), limits.limit_for(job_type));
    }

    println!();
    println!("Providers (max rate-limit wait {}s):", config.rate_limit.max_wait_secs);
    for (name, p) in &config.providers {
        let marker = if *name == config.runner.provider { "*" } else { " " };
        let rpm = p
            .requests_per_minute
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".into());
        let rpd = p
            .requests_per_day
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".into());
        let key = if env::var(p.api_key_var(name)).is_ok() {
            "set"
        } else {
            "missing"
        };
        println!(
            "{marker} {name:<12} model={} rpm={rpm} rpd={rpd} key {}={key}",
            p.model,
            p.api_key_var(name)
        );
    }
    Ok(())
}
