use std::fs;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use exec_contract_core::{
    decode_run, record_completion, record_decision, record_received, start_run,
};
use exec_contract_domain::ExecutionRun;
use exec_contract_rating::rate_execution;
use serde_json::{Map, Value};
use ulid::Ulid;

#[derive(Debug, Parser)]
#[command(name = "exec-contract")]
#[command(about = "Agent execution traces with contract validation and risk ratings")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Demo(DemoArgs),
    Rate(RateArgs),
    Events(EventsArgs),
    Export(ExportArgs),
}

#[derive(Debug, Args)]
struct DemoArgs {
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct RateArgs {
    #[arg(long)]
    runs: PathBuf,
}

#[derive(Debug, Args)]
struct EventsArgs {
    #[arg(long)]
    runs: PathBuf,
    #[arg(long)]
    run_id: String,
}

#[derive(Debug, Args)]
struct ExportArgs {
    #[arg(long)]
    runs: PathBuf,
    #[arg(long)]
    run_id: String,
    #[arg(long)]
    out: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Demo(args) => demo_command(&args),
        Commands::Rate(args) => rate_command(&args),
        Commands::Events(args) => events_command(&args),
        Commands::Export(args) => export_command(&args),
    }
}

fn demo_command(args: &DemoArgs) -> Result<()> {
    let runs = build_delegation_sample()?;

    println!("--- EXECUTION RISKS ---");
    print_ratings(&runs);

    if let Some(out) = &args.out {
        write_run_map(out, &runs)?;
        println!("wrote {} runs to {}", runs.len(), out.display());
    }

    Ok(())
}

fn rate_command(args: &RateArgs) -> Result<()> {
    let runs = load_run_map(&args.runs)?;
    print_ratings(&runs);
    Ok(())
}

fn events_command(args: &EventsArgs) -> Result<()> {
    let run = find_run(&args.runs, &args.run_id)?;
    for event in &run.events {
        println!("{}", serde_json::to_string(event)?);
    }
    Ok(())
}

fn export_command(args: &ExportArgs) -> Result<()> {
    let run = find_run(&args.runs, &args.run_id)?;
    let event_count = run.events.len();

    let output = File::create(&args.out)?;
    let mut writer = BufWriter::new(output);
    for event in &run.events {
        writeln!(writer, "{}", serde_json::to_string(event)?)?;
    }
    writer.flush()?;

    println!("exported {event_count} events to {}", args.out.display());
    Ok(())
}

/// Delegation sample: an orchestrator fans work out to three specialist
/// agents and the rating engine surfaces the stuck and escalated runs.
fn build_delegation_sample() -> Result<Vec<(String, ExecutionRun)>> {
    let orchestrator_id = new_run_id("bmad");

    let mut orchestrator = start_run(&orchestrator_id, "BMAD_ORCHESTRATOR", None, None);
    record_received(&mut orchestrator, 1, Value::from("Build a SaaS landing page"))?;
    record_decision(
        &mut orchestrator,
        2,
        "DELEGATE",
        None,
        Some("Multiple specialized tasks required"),
    )?;

    let mut product = start_run(
        &new_run_id("product"),
        "PRODUCT_AGENT",
        Some(&orchestrator_id),
        Some("BMAD_ORCHESTRATOR"),
    );
    record_received(&mut product, 1, Value::from("Define product requirements"))?;
    record_completion(&mut product, 2, Value::from("PRD drafted"))?;

    let mut ux = start_run(
        &new_run_id("ux"),
        "UX_AGENT",
        Some(&orchestrator_id),
        Some("BMAD_ORCHESTRATOR"),
    );
    record_received(&mut ux, 1, Value::from("Design landing page UX"))?;
    record_decision(
        &mut ux,
        2,
        "ESCALATE",
        Some(0.4),
        Some("Design direction unclear"),
    )?;
    record_completion(&mut ux, 3, Value::from("Needs human review"))?;

    let mut tech = start_run(
        &new_run_id("tech"),
        "TECH_AGENT",
        Some(&orchestrator_id),
        Some("BMAD_ORCHESTRATOR"),
    );
    record_received(&mut tech, 1, Value::from("Recommend tech stack"))?;
    record_completion(&mut tech, 2, Value::from("Next.js + Tailwind recommended"))?;

    Ok(vec![
        ("orchestrator".to_string(), orchestrator),
        ("product".to_string(), product),
        ("ux".to_string(), ux),
        ("tech".to_string(), tech),
    ])
}

fn new_run_id(prefix: &str) -> String {
    format!("run_{prefix}_{}", Ulid::new())
}

fn print_ratings(runs: &[(String, ExecutionRun)]) {
    for (label, run) in runs {
        println!(
            "label={label} run_id={} agent={} events={} rating={}",
            run.run_id,
            run.agent_id,
            run.events.len(),
            rate_execution(run)
        );
    }
}

fn write_run_map(path: &Path, runs: &[(String, ExecutionRun)]) -> Result<()> {
    let mut map = Map::new();
    for (label, run) in runs {
        map.insert(label.clone(), serde_json::to_value(run)?);
    }

    let output = File::create(path)?;
    let mut writer = BufWriter::new(output);
    serde_json::to_writer_pretty(&mut writer, &Value::Object(map))?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

fn load_run_map(path: &Path) -> Result<Vec<(String, ExecutionRun)>> {
    let body =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let value: Value =
        serde_json::from_str(&body).with_context(|| format!("failed to parse {}", path.display()))?;
    let Value::Object(entries) = value else {
        return Err(anyhow!(
            "{} must contain a JSON object of label -> run",
            path.display()
        ));
    };

    let mut runs = Vec::with_capacity(entries.len());
    for (label, run_value) in entries {
        let run = decode_run(&run_value).with_context(|| format!("invalid run '{label}'"))?;
        runs.push((label, run));
    }
    Ok(runs)
}

fn find_run(path: &Path, run_id: &str) -> Result<ExecutionRun> {
    let runs = load_run_map(path)?;
    runs.into_iter()
        .map(|(_, run)| run)
        .find(|run| run.run_id == run_id)
        .ok_or_else(|| anyhow!("run_id {run_id} not found in {}", path.display()))
}
